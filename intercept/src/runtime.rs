//! Services the interception engine consumes from the managed runtime.

use crate::descriptor::{DescriptorLayout, MethodRef};
use crate::error::{InvokeError, RuntimeError};
use crate::types::{ClassRef, ObjectRef, Value};

/// Opaque id of a reference handle issued by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Valid until released; released at the end of the current call.
    Local,
    /// Valid until released; hook records never release theirs.
    Global,
}

/// The runtime interface.
///
/// Methods documented as suspension points may run the garbage collector, which is free to move
/// objects. A raw [`ObjectRef`] obtained before a suspension point must not be used after it;
/// hold it in a handle and re-read it instead.
pub trait ManagedRuntime: Send + Sync {
    /// Layout of the runtime's method descriptors.
    fn descriptor_layout(&self) -> DescriptorLayout;

    /// Looks up a method by name and signature in `class` and its superclasses.
    fn resolve_method(&self, class: ClassRef, name: &str, signature: &str) -> Option<MethodRef>;

    // ── classes ──

    /// Runs the class initializer if needed. Suspension point.
    fn initialize_class(&self, class: ClassRef) -> Result<(), RuntimeError>;
    fn is_initialized(&self, class: ClassRef) -> bool;
    fn class_of(&self, obj: ObjectRef) -> ClassRef;
    fn superclass(&self, class: ClassRef) -> Option<ClassRef>;
    fn is_interface(&self, class: ClassRef) -> bool;
    fn is_instance_of(&self, obj: ObjectRef, class: ClassRef) -> bool;
    fn class_name(&self, class: ClassRef) -> String;

    // ── method metadata ──

    fn method_name(&self, method: MethodRef) -> String;
    /// Type signature, e.g. `(ILjava/lang/String;)V`.
    fn method_signature(&self, method: MethodRef) -> String;
    /// Declared class of the `index`th (receiver excluded) reference parameter.
    fn parameter_class(&self, method: MethodRef, index: usize) -> Option<ClassRef>;
    /// Declared class of a reference return type.
    fn return_class(&self, method: MethodRef) -> Option<ClassRef>;
    /// Reflection object for `method`. Suspension point.
    fn reflect_method(&self, method: MethodRef) -> Result<ObjectRef, RuntimeError>;

    // ── boxing and arrays ──

    /// Allocates the wrapper object for a primitive. Suspension point.
    fn box_primitive(&self, value: Value) -> Result<ObjectRef, RuntimeError>;
    /// The primitive held by a wrapper object, or `None` if `obj` is not a wrapper.
    fn unbox_primitive(&self, obj: ObjectRef) -> Option<Value>;
    /// Allocates an `Object[]` of nulls. Suspension point.
    fn allocate_object_array(&self, len: usize) -> Result<ObjectRef, RuntimeError>;
    fn array_length(&self, array: ObjectRef) -> usize;
    fn array_element(&self, array: ObjectRef, index: usize) -> Option<ObjectRef>;
    fn set_array_element(&self, array: ObjectRef, index: usize, value: Option<ObjectRef>);

    // ── handles ──

    fn new_handle(&self, obj: Option<ObjectRef>, kind: HandleKind) -> HandleId;
    /// Current location of the handle's object.
    fn resolve_handle(&self, handle: HandleId) -> Option<ObjectRef>;
    fn release_handle(&self, handle: HandleId);

    // ── calls ──

    /// Calls exactly `method` (no virtual dispatch) with already unboxed arguments. A managed
    /// exception surfaces as [`RuntimeError::Exception`]. Suspension point.
    fn invoke_method(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Value],
    ) -> Result<Value, RuntimeError>;

    /// Makes `error` the pending exception of the current thread.
    fn raise(&self, error: &InvokeError);
}

/// A local handle released on drop.
pub struct ScopedHandle<'r> {
    runtime: &'r dyn ManagedRuntime,
    id: HandleId,
}

impl<'r> ScopedHandle<'r> {
    pub fn new(runtime: &'r dyn ManagedRuntime, obj: Option<ObjectRef>) -> ScopedHandle<'r> {
        let id = runtime.new_handle(obj, HandleKind::Local);
        ScopedHandle { runtime, id }
    }

    #[inline]
    pub fn get(&self) -> Option<ObjectRef> {
        self.runtime.resolve_handle(self.id)
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        self.runtime.release_handle(self.id);
    }
}

/// A global handle owned by a hook record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHandle(HandleId);

impl GlobalHandle {
    pub fn new(runtime: &dyn ManagedRuntime, obj: Option<ObjectRef>) -> GlobalHandle {
        GlobalHandle(runtime.new_handle(obj, HandleKind::Global))
    }

    #[inline]
    pub fn get(self, runtime: &dyn ManagedRuntime) -> Option<ObjectRef> {
        runtime.resolve_handle(self.0)
    }

    /// Releases the handle. Only used when a record is discarded before publication.
    pub(crate) fn release(self, runtime: &dyn ManagedRuntime) {
        runtime.release_handle(self.0);
    }
}
