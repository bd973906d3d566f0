//! rehook-intercept: method entry-point interception for managed bytecode runtimes.

pub mod arch;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod interceptor;
pub mod runtime;
pub mod types;

// Re-exports for convenience (flattened imports)
pub use arch::Architecture;
pub use config::InterceptConfig;
pub use descriptor::patcher::PatchStyle;
pub use descriptor::{MethodDescriptor, MethodRef};
pub use error::{HookError, InvokeError, Result, RuntimeError};
pub use interceptor::callbacks::{CallbackChain, HookParam, MethodHook};
pub use interceptor::listener::{HookHandler, HookedInvocation};
pub use interceptor::registry::HookRecord;
pub use interceptor::{Interceptor, Transaction};
pub use runtime::ManagedRuntime;
pub use types::{ClassRef, ObjectRef, Shorty, TypeTag, Value};

#[cfg(test)]
pub(crate) mod test_utils;


/// Process-global lock for tests that touch process-wide state (environment variables,
/// descriptors shared between interceptors).
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
