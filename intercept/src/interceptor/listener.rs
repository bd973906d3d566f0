use crate::descriptor::MethodRef;
use crate::error::InvokeResult;
use crate::interceptor::dispatch;
use crate::interceptor::marshal::BoxedArguments;
use crate::interceptor::registry::HookRecord;
use crate::runtime::ManagedRuntime;
use crate::types::ObjectRef;

/// Receives every call to a hooked method.
///
/// The returned object is unboxed to the method's declared return type; `Ok(None)` is the
/// result for void methods. Errors are raised in the caller unchanged.
pub trait HookHandler: Send + Sync {
    fn handle_hooked_method(&self, call: &HookedInvocation<'_>) -> InvokeResult<Option<ObjectRef>>;
}

impl<F> HookHandler for F
where
    F: Fn(&HookedInvocation<'_>) -> InvokeResult<Option<ObjectRef>> + Send + Sync,
{
    fn handle_hooked_method(&self, call: &HookedInvocation<'_>) -> InvokeResult<Option<ObjectRef>> {
        self(call)
    }
}

/// One intercepted call as seen by a [`HookHandler`].
///
/// The receiver and the argument array stay pinned for the whole call. Their accessors return
/// current locations, so re-read them after anything that may allocate.
pub struct HookedInvocation<'a> {
    record: &'static HookRecord,
    runtime: &'a dyn ManagedRuntime,
    boxed: &'a BoxedArguments<'a>,
}

impl<'a> HookedInvocation<'a> {
    pub(crate) fn new(
        record: &'static HookRecord,
        runtime: &'a dyn ManagedRuntime,
        boxed: &'a BoxedArguments<'a>,
    ) -> Self {
        HookedInvocation {
            record,
            runtime,
            boxed,
        }
    }

    /// The receiver, or `None` for static methods.
    #[inline]
    pub fn receiver(&self) -> Option<ObjectRef> {
        self.boxed.receiver()
    }

    /// `Object[]` of boxed parameters, or null for zero-parameter methods.
    #[inline]
    pub fn args(&self) -> Option<ObjectRef> {
        self.boxed.array()
    }

    /// The hooked method.
    #[inline]
    pub fn method(&self) -> MethodRef {
        self.record.method()
    }

    /// Id of the hooked method in its declaring file.
    #[inline]
    pub fn original_method_id(&self) -> u32 {
        self.record.method().descriptor().method_id
    }

    /// Reflection object of the hooked method.
    pub fn reflected(&self) -> Option<ObjectRef> {
        self.record.reflected()
    }

    /// Object supplied when the hook was installed.
    pub fn payload(&self) -> Option<ObjectRef> {
        self.record.payload()
    }

    #[inline]
    pub fn record(&self) -> &'static HookRecord {
        self.record
    }

    #[inline]
    pub fn runtime(&self) -> &'a dyn ManagedRuntime {
        self.runtime
    }

    /// Elements of the argument array.
    pub fn arguments(&self) -> Vec<Option<ObjectRef>> {
        match self.args() {
            Some(array) => (0..self.runtime.array_length(array))
                .map(|i| self.runtime.array_element(array, i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Runs the pre-hook implementation.
    pub fn invoke_original(
        &self,
        receiver: Option<ObjectRef>,
        args: &[Option<ObjectRef>],
    ) -> InvokeResult<Option<ObjectRef>> {
        dispatch::invoke_original(self.runtime, self.method(), receiver, args)
    }

    /// Runs the superclass implementation.
    pub fn invoke_super(
        &self,
        receiver: Option<ObjectRef>,
        args: &[Option<ObjectRef>],
    ) -> InvokeResult<Option<ObjectRef>> {
        dispatch::invoke_super(self.runtime, self.method(), receiver, args)
    }
}
