//! A [`HookHandler`] that runs prioritized before/after callbacks around the original method.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::warn;

use crate::descriptor::MethodRef;
use crate::error::{InvokeError, InvokeResult};
use crate::interceptor::listener::{HookHandler, HookedInvocation};
use crate::runtime::{ManagedRuntime, ScopedHandle};
use crate::types::ObjectRef;

pub const PRIORITY_DEFAULT: i32 = 50;
pub const PRIORITY_LOWEST: i32 = -10000;
pub const PRIORITY_HIGHEST: i32 = 10000;

/// Callbacks run around a hooked method. Higher priorities run their `before` first and their
/// `after` last.
pub trait MethodHook: Send + Sync {
    fn priority(&self) -> i32 {
        PRIORITY_DEFAULT
    }

    fn before(&self, _param: &mut HookParam<'_>) -> InvokeResult<()> {
        Ok(())
    }

    fn after(&self, _param: &mut HookParam<'_>) -> InvokeResult<()> {
        Ok(())
    }
}

/// The mutable view of a hooked call passed through the callback chain.
///
/// The receiver, the arguments and the result are held in local handles, so the accessors
/// return their current locations even after a callback allocated.
pub struct HookParam<'a> {
    pub method: MethodRef,
    receiver: ScopedHandle<'a>,
    args: Vec<ScopedHandle<'a>>,
    result: ScopedHandle<'a>,
    throwable: Option<InvokeError>,
    return_early: bool,
    runtime: &'a dyn ManagedRuntime,
}

/// Result or error saved before an `after` callback runs.
struct Checkpoint<'a> {
    result: ScopedHandle<'a>,
    throwable: Option<InvokeError>,
}

impl<'a> HookParam<'a> {
    fn new(
        runtime: &'a dyn ManagedRuntime,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Option<ObjectRef>],
    ) -> Self {
        HookParam {
            method,
            receiver: ScopedHandle::new(runtime, receiver),
            args: args.iter().map(|&a| ScopedHandle::new(runtime, a)).collect(),
            result: ScopedHandle::new(runtime, None),
            throwable: None,
            return_early: false,
            runtime,
        }
    }

    #[inline]
    pub fn runtime(&self) -> &'a dyn ManagedRuntime {
        self.runtime
    }

    #[inline]
    pub fn receiver(&self) -> Option<ObjectRef> {
        self.receiver.get()
    }

    /// Replaces the receiver passed to the original method.
    pub fn set_receiver(&mut self, receiver: Option<ObjectRef>) {
        self.receiver = ScopedHandle::new(self.runtime, receiver);
    }

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Argument `index`, or `None` past the end.
    pub fn arg(&self, index: usize) -> Option<ObjectRef> {
        self.args.get(index).and_then(ScopedHandle::get)
    }

    /// Current locations of all arguments.
    pub fn args(&self) -> Vec<Option<ObjectRef>> {
        self.args.iter().map(ScopedHandle::get).collect()
    }

    /// Replaces argument `index`. Out-of-range indices are ignored.
    pub fn set_arg(&mut self, index: usize, value: Option<ObjectRef>) {
        if index < self.args.len() {
            self.args[index] = ScopedHandle::new(self.runtime, value);
        }
    }

    #[inline]
    pub fn result(&self) -> Option<ObjectRef> {
        self.result.get()
    }

    /// Sets the result. Called from `before`, this skips the original method and the remaining
    /// `before` callbacks.
    pub fn set_result(&mut self, result: Option<ObjectRef>) {
        self.result = ScopedHandle::new(self.runtime, result);
        self.throwable = None;
        self.return_early = true;
    }

    #[inline]
    pub fn throwable(&self) -> Option<&InvokeError> {
        self.throwable.as_ref()
    }

    #[inline]
    pub fn has_throwable(&self) -> bool {
        self.throwable.is_some()
    }

    /// Makes the call fail with `error`. Same early-return rules as [`HookParam::set_result`].
    pub fn set_throwable(&mut self, error: InvokeError) {
        self.throwable = Some(error);
        self.result = ScopedHandle::new(self.runtime, None);
        self.return_early = true;
    }

    /// The result, or the pending error.
    pub fn result_or_throwable(&self) -> InvokeResult<Option<ObjectRef>> {
        match &self.throwable {
            Some(e) => Err(e.clone()),
            None => Ok(self.result()),
        }
    }

    fn reset(&mut self) {
        self.result = ScopedHandle::new(self.runtime, None);
        self.throwable = None;
        self.return_early = false;
    }

    fn checkpoint(&self) -> Checkpoint<'a> {
        Checkpoint {
            result: ScopedHandle::new(self.runtime, self.result()),
            throwable: self.throwable.clone(),
        }
    }

    fn restore(&mut self, last: Checkpoint<'a>) {
        self.result = last.result;
        self.throwable = last.throwable;
        self.return_early = true;
    }

    fn complete(&mut self, outcome: InvokeResult<Option<ObjectRef>>) {
        match outcome {
            Ok(result) => self.result = ScopedHandle::new(self.runtime, result),
            Err(e) => self.throwable = Some(e),
        }
    }
}

/// Per-method callback lists, each sorted by descending priority.
#[derive(Default)]
pub struct CallbackChain {
    callbacks: RwLock<HashMap<usize, Vec<Arc<dyn MethodHook>>>>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `hook` to `method`'s chain. Among equal priorities, earlier registrations run
    /// their `before` first. Returns `false` if this exact callback is already registered.
    pub fn register(&self, method: MethodRef, hook: Arc<dyn MethodHook>) -> bool {
        let mut map = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let list = map.entry(method.address()).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &hook)) {
            return false;
        }
        let at = list
            .iter()
            .position(|h| h.priority() < hook.priority())
            .unwrap_or(list.len());
        list.insert(at, hook);
        true
    }

    /// Removes `hook` from `method`'s chain. Calls already in progress still run it.
    pub fn unregister(&self, method: MethodRef, hook: &Arc<dyn MethodHook>) -> bool {
        let mut map = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = map.get_mut(&method.address()) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, hook));
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&method.address());
        }
        removed
    }

    /// Snapshot of `method`'s chain.
    pub fn callbacks(&self, method: MethodRef) -> Vec<Arc<dyn MethodHook>> {
        let map = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        map.get(&method.address()).cloned().unwrap_or_default()
    }
}

impl HookHandler for CallbackChain {
    fn handle_hooked_method(&self, call: &HookedInvocation<'_>) -> InvokeResult<Option<ObjectRef>> {
        let callbacks = self.callbacks(call.method());
        if callbacks.is_empty() {
            return call.invoke_original(call.receiver(), &call.arguments());
        }

        let args = call.arguments();
        let mut param = HookParam::new(call.runtime(), call.method(), call.receiver(), &args);

        let mut ran = 0;
        for hook in &callbacks {
            ran += 1;
            if let Err(e) = hook.before(&mut param) {
                warn!("before callback of {:?} failed: {e}", param.method);
                param.reset();
                continue;
            }
            if param.return_early {
                break;
            }
        }

        if !param.return_early {
            let outcome = call.invoke_original(param.receiver(), &param.args());
            param.complete(outcome);
        }

        for hook in callbacks[..ran].iter().rev() {
            let last = param.checkpoint();
            if let Err(e) = hook.after(&mut param) {
                warn!("after callback of {:?} failed: {e}", param.method);
                param.restore(last);
            }
        }

        param.result_or_throwable()
    }
}
