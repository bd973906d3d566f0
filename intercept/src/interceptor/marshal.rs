//! Conversion between raw argument words and managed objects.

use log::trace;

use crate::descriptor::MethodRef;
use crate::error::{InvokeError, InvokeResult, RuntimeError};
use crate::interceptor::invocation::CallFrame;
use crate::interceptor::visitor::ArgumentSlot;
use crate::runtime::{ManagedRuntime, ScopedHandle};
use crate::types::{ObjectRef, Shorty, TypeTag, Value};

/// Boxed arguments of one hooked call, kept reachable through local handles.
pub struct BoxedArguments<'r> {
    has_receiver: bool,
    array: Option<ScopedHandle<'r>>,
    /// Handle per reference slot, keyed by slot index (receiver included).
    references: Vec<(usize, ScopedHandle<'r>)>,
}

impl BoxedArguments<'_> {
    /// Current location of the receiver.
    pub fn receiver(&self) -> Option<ObjectRef> {
        if !self.has_receiver {
            return None;
        }
        self.references.first().and_then(|(_, h)| h.get())
    }

    /// Current location of the `Object[]` holding the parameters.
    pub fn array(&self) -> Option<ObjectRef> {
        self.array.as_ref().and_then(ScopedHandle::get)
    }
}

pub struct ArgumentMarshaler<'r> {
    runtime: &'r dyn ManagedRuntime,
    empty_args_array: bool,
}

impl<'r> ArgumentMarshaler<'r> {
    pub fn new(runtime: &'r dyn ManagedRuntime) -> Self {
        ArgumentMarshaler {
            runtime,
            empty_args_array: false,
        }
    }

    /// Allocate `[]` rather than passing null for zero-parameter methods.
    pub fn with_empty_args_array(mut self, enabled: bool) -> Self {
        self.empty_args_array = enabled;
        self
    }

    /// Boxes the frame's arguments into an `Object[]`.
    ///
    /// Every reference is pinned in a handle before the first allocation, since allocating the
    /// array or a wrapper may move any object the frame points to.
    pub fn box_arguments(
        &self,
        frame: &CallFrame<'_>,
        slots: &[ArgumentSlot],
        is_static: bool,
    ) -> Result<BoxedArguments<'r>, RuntimeError> {
        let rt = self.runtime;
        let first_param = usize::from(!is_static);

        let mut references = Vec::new();
        for (i, slot) in slots.iter().enumerate() {
            if slot.tag == TypeTag::Reference {
                let raw = frame.read_raw(slot) as u32;
                references.push((i, ScopedHandle::new(rt, ObjectRef::from_raw(raw))));
            }
        }
        let param_count = slots.len() - first_param;
        if param_count == 0 && !self.empty_args_array {
            return Ok(BoxedArguments {
                has_receiver: !is_static,
                array: None,
                references,
            });
        }

        let array = ScopedHandle::new(rt, Some(rt.allocate_object_array(param_count)?));
        let mut refs = references.iter().filter(|(i, _)| *i >= first_param);
        for (index, slot) in slots[first_param..].iter().enumerate() {
            let element = if slot.tag == TypeTag::Reference {
                refs.next().and_then(|(_, handle)| handle.get())
            } else {
                Some(rt.box_primitive(frame.read_value(slot))?)
            };
            let array_obj = array
                .get()
                .ok_or(RuntimeError::OutOfMemory("argument array"))?;
            rt.set_array_element(array_obj, index, element);
        }
        trace!("boxed {param_count} argument(s)");

        Ok(BoxedArguments {
            has_receiver: !is_static,
            array: Some(array),
            references,
        })
    }

    /// Writes the current location of every reference argument back into the frame.
    pub fn fixup_references(
        &self,
        frame: &mut CallFrame<'_>,
        slots: &[ArgumentSlot],
        boxed: &BoxedArguments<'_>,
    ) {
        for (index, handle) in &boxed.references {
            frame.write_reference(&slots[*index], handle.get());
        }
    }

    fn type_name(&self, obj: ObjectRef) -> String {
        self.runtime.class_name(self.runtime.class_of(obj))
    }

    /// Converts one reflective argument to the declared parameter type.
    pub fn unbox_argument(
        &self,
        method: MethodRef,
        index: usize,
        declared: TypeTag,
        value: Option<ObjectRef>,
    ) -> InvokeResult<Value> {
        let rt = self.runtime;
        let mismatch = |expected: String, actual: String| InvokeError::ArgumentTypeMismatch {
            method: rt.method_name(method),
            index,
            expected,
            actual,
        };

        if declared == TypeTag::Reference {
            if let (Some(obj), Some(class)) = (value, rt.parameter_class(method, index)) {
                if !rt.is_instance_of(obj, class) {
                    return Err(mismatch(rt.class_name(class), self.type_name(obj)));
                }
            }
            return Ok(Value::Reference(value));
        }

        let obj = value.ok_or_else(|| mismatch(declared.name().into(), "null".into()))?;
        let stored = rt
            .unbox_primitive(obj)
            .ok_or_else(|| mismatch(declared.name().into(), self.type_name(obj)))?;
        stored
            .widen_to(declared)
            .ok_or_else(|| mismatch(declared.name().into(), stored.tag().name().into()))
    }

    /// Unboxes a full reflective argument list after checking its length.
    pub fn unbox_arguments(
        &self,
        method: MethodRef,
        shorty: &Shorty,
        args: &[Option<ObjectRef>],
    ) -> InvokeResult<Vec<Value>> {
        let params = shorty.params();
        if args.len() != params.len() {
            return Err(InvokeError::ArgumentCountMismatch {
                expected: params.len(),
                actual: args.len(),
            });
        }
        params
            .iter()
            .zip(args)
            .enumerate()
            .map(|(i, (&tag, &arg))| self.unbox_argument(method, i, tag, arg))
            .collect()
    }

    /// Converts a handler's result to the method's declared return type.
    pub fn unbox_result(
        &self,
        method: MethodRef,
        return_type: TypeTag,
        result: Option<ObjectRef>,
    ) -> InvokeResult<Value> {
        let rt = self.runtime;
        match return_type {
            TypeTag::Void => Ok(Value::Void),
            TypeTag::Reference => {
                if let (Some(obj), Some(class)) = (result, rt.return_class(method)) {
                    if !rt.is_instance_of(obj, class) {
                        return Err(InvokeError::ReturnTypeMismatch {
                            expected: rt.class_name(class),
                            actual: self.type_name(obj),
                        });
                    }
                }
                Ok(Value::Reference(result))
            }
            primitive => {
                let obj = result.ok_or(InvokeError::NullResult(primitive.name()))?;
                let stored = rt.unbox_primitive(obj).ok_or_else(|| InvokeError::ReturnTypeMismatch {
                    expected: primitive.name().into(),
                    actual: self.type_name(obj),
                })?;
                stored
                    .widen_to(primitive)
                    .ok_or_else(|| InvokeError::ReturnTypeMismatch {
                        expected: primitive.name().into(),
                        actual: stored.tag().name().into(),
                    })
            }
        }
    }

    /// Boxes a reflective call's return value. Void and null both yield `None`.
    pub fn box_result(&self, value: Value) -> Result<Option<ObjectRef>, RuntimeError> {
        match value {
            Value::Void => Ok(None),
            Value::Reference(obj) => Ok(obj),
            primitive => self.runtime.box_primitive(primitive).map(Some),
        }
    }
}
