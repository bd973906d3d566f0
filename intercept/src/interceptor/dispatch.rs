//! The three call paths: hooked call, original call, super call.

use log::{debug, trace, warn};

use super::invocation::CallFrame;
use super::listener::HookedInvocation;
use super::marshal::ArgumentMarshaler;
use super::registry::{describe, record_of, HookRecord};
use crate::descriptor::{MethodDescriptor, MethodRef};
use crate::error::{InvokeError, InvokeResult, RuntimeError};
use crate::runtime::{ManagedRuntime, ScopedHandle};
use crate::types::{ObjectRef, Value};

/// Entry point of every hooked method.
///
/// Reached from the runtime's quick-to-hook stub, which saves the argument registers into a
/// "refs and args" frame and passes the callee and that frame's stack pointer. The return value
/// is the raw result word; on error a managed exception is left pending and zero is returned.
///
/// # Safety
/// `method` must be a hooked descriptor and `sp` its freshly built callee-save frame.
pub unsafe extern "C" fn quick_dispatch_entry(method: *const MethodDescriptor, sp: *mut u8) -> u64 {
    let Some(method) = MethodRef::from_raw(method) else {
        warn!("hook dispatch without a method");
        return 0;
    };
    let Some(record) = record_of(method) else {
        warn!("hook dispatch for unhooked {method:?}");
        return 0;
    };
    let shared = record.shared();
    let mut frame = CallFrame::from_raw(sp, shared.arch);
    match handle_hooked_call(record, &mut frame) {
        Ok(value) => value.to_raw(),
        Err(err) => {
            debug!("hooked call to {method:?} failed: {err}");
            shared.runtime.raise(&err);
            0
        }
    }
}

/// Boxes the frame, runs the handler and converts its result.
pub(crate) fn handle_hooked_call(
    record: &'static HookRecord,
    frame: &mut CallFrame<'_>,
) -> InvokeResult<Value> {
    let shared = record.shared();
    let rt = shared.runtime.as_ref();
    let marshaler = ArgumentMarshaler::new(rt).with_empty_args_array(shared.config.empty_args_array);

    let boxed = marshaler.box_arguments(frame, record.slots(), record.is_static())?;
    let invocation = HookedInvocation::new(record, rt, &boxed);
    trace!("dispatching {:?} to handler", record.method());
    let result = shared.handler.handle_hooked_method(&invocation);

    marshaler.fixup_references(frame, record.slots(), &boxed);
    marshaler.unbox_result(record.method(), record.shorty().return_type(), result?)
}

/// Calls the pre-hook implementation of `method` (or `method` itself if it is not hooked).
pub fn invoke_original(
    rt: &dyn ManagedRuntime,
    method: MethodRef,
    receiver: Option<ObjectRef>,
    args: &[Option<ObjectRef>],
) -> InvokeResult<Option<ObjectRef>> {
    let target = record_of(method).map_or(method, HookRecord::original);
    invoke_reflective(rt, method, target, receiver, args)
}

/// Calls the implementation of `method` inherited from the declaring class's superclass.
///
/// Static methods, and classes without a superclass, yield `None` without calling anything.
pub fn invoke_super(
    rt: &dyn ManagedRuntime,
    method: MethodRef,
    receiver: Option<ObjectRef>,
    args: &[Option<ObjectRef>],
) -> InvokeResult<Option<ObjectRef>> {
    let desc = method.descriptor();
    if desc.is_static() {
        return Ok(None);
    }
    let receiver = receiver.ok_or_else(|| InvokeError::NullReceiver(describe(rt, method)))?;
    // Class initialization may move objects; keep the call's references in handles across it.
    let pinned_receiver = ScopedHandle::new(rt, Some(receiver));
    let pinned_args: Vec<ScopedHandle<'_>> =
        args.iter().map(|&a| ScopedHandle::new(rt, a)).collect();

    let Some(superclass) = desc.declaring_class().and_then(|c| rt.superclass(c)) else {
        return Ok(None);
    };

    let name = rt.method_name(method);
    let signature = rt.method_signature(method);
    let target = rt
        .resolve_method(superclass, &name, &signature)
        .ok_or_else(|| RuntimeError::NoSuchMethod {
            class: rt.class_name(superclass),
            name,
            signature,
        })?;

    if target.descriptor().is_static() || rt.is_interface(superclass) {
        rt.initialize_class(superclass)?;
    }
    let receiver = pinned_receiver
        .get()
        .ok_or_else(|| InvokeError::NullReceiver(describe(rt, method)))?;
    let args: Vec<Option<ObjectRef>> = pinned_args.iter().map(ScopedHandle::get).collect();
    if !rt.is_instance_of(receiver, superclass) {
        return Err(InvokeError::ReceiverMismatch {
            expected: rt.class_name(superclass),
            actual: rt.class_name(rt.class_of(receiver)),
        });
    }
    invoke_reflective(rt, target, target, Some(receiver), &args)
}

/// Reflective call of `target` using `method`'s signature: receiver check, argument count
/// check, unboxing, call, result boxing.
fn invoke_reflective(
    rt: &dyn ManagedRuntime,
    method: MethodRef,
    target: MethodRef,
    receiver: Option<ObjectRef>,
    args: &[Option<ObjectRef>],
) -> InvokeResult<Option<ObjectRef>> {
    let desc = method.descriptor();
    let shorty = desc.shorty()?;

    let receiver = if desc.is_static() {
        None
    } else {
        let obj = receiver.ok_or_else(|| InvokeError::NullReceiver(describe(rt, method)))?;
        if let Some(class) = desc.declaring_class() {
            if !rt.is_instance_of(obj, class) {
                return Err(InvokeError::ReceiverMismatch {
                    expected: rt.class_name(class),
                    actual: rt.class_name(rt.class_of(obj)),
                });
            }
        }
        Some(obj)
    };

    let marshaler = ArgumentMarshaler::new(rt);
    let values = marshaler.unbox_arguments(method, &shorty, args)?;
    let result = rt.invoke_method(target, receiver, &values)?;
    Ok(marshaler.box_result(result)?)
}
