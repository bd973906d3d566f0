use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::arch::Architecture;
use crate::config::InterceptConfig;
use crate::descriptor::{DescriptorLayout, MethodRef};
use crate::error::{HookError, InvokeResult, Result};
use crate::interceptor::listener::HookHandler;
use crate::interceptor::registry::HookRecord;
use crate::runtime::ManagedRuntime;
use crate::types::{ClassRef, ObjectRef};

pub mod callbacks;
pub mod dispatch;
pub mod invocation;
pub mod listener;
pub mod marshal;
pub mod registry;
pub mod visitor;

/// State shared by an interceptor and every record it installed.
pub(crate) struct Shared {
    pub(crate) runtime: Arc<dyn ManagedRuntime>,
    pub(crate) handler: Arc<dyn HookHandler>,
    pub(crate) config: InterceptConfig,
    pub(crate) arch: Architecture,
    pub(crate) layout: DescriptorLayout,
}

/// Installs hooks into one runtime and routes hooked calls to one handler.
///
/// Hooks are permanent: there is no unhook, and records outlive the interceptor.
pub struct Interceptor {
    shared: Arc<Shared>,
    installs: Mutex<()>,
}

impl Interceptor {
    /// Fails if the architecture is unsupported or the runtime's descriptor layout differs from
    /// the compiled-in one.
    pub fn new(
        runtime: Arc<dyn ManagedRuntime>,
        handler: Arc<dyn HookHandler>,
        config: InterceptConfig,
    ) -> Result<Interceptor> {
        let arch = config.resolve_architecture()?;
        let layout = runtime.descriptor_layout();
        layout.validate()?;
        debug!(
            "interceptor ready: arch={arch} style={} descriptor={}B slack={}B",
            config.patch_style.name(),
            layout.descriptor_size,
            config.snapshot_slack
        );
        Ok(Interceptor {
            shared: Arc::new(Shared {
                runtime,
                handler,
                config,
                arch,
                layout,
            }),
            installs: Mutex::new(()),
        })
    }

    /// Starts a batch of installs. Installs through one interceptor are serialized; callers
    /// driving several interceptors over the same methods must serialize them too.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        let guard = self.installs.lock().unwrap_or_else(|e| e.into_inner());
        Transaction {
            interceptor: self,
            _guard: guard,
            installed: Vec::new(),
        }
    }

    #[inline]
    pub fn is_hooked(&self, method: MethodRef) -> bool {
        registry::is_hooked(method)
    }

    #[inline]
    pub fn record(&self, method: MethodRef) -> Option<&'static HookRecord> {
        registry::record_of(method)
    }

    pub fn invoke_original(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Option<ObjectRef>],
    ) -> InvokeResult<Option<ObjectRef>> {
        dispatch::invoke_original(self.runtime(), method, receiver, args)
    }

    pub fn invoke_super(
        &self,
        method: MethodRef,
        receiver: Option<ObjectRef>,
        args: &[Option<ObjectRef>],
    ) -> InvokeResult<Option<ObjectRef>> {
        dispatch::invoke_super(self.runtime(), method, receiver, args)
    }

    #[inline]
    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.shared.runtime.as_ref()
    }

    #[inline]
    pub fn architecture(&self) -> Architecture {
        self.shared.arch
    }

    #[inline]
    pub fn config(&self) -> &InterceptConfig {
        &self.shared.config
    }
}

/// Exclusive right to install hooks, obtained from [`Interceptor::begin_transaction`].
pub struct Transaction<'i> {
    interceptor: &'i Interceptor,
    _guard: MutexGuard<'i, ()>,
    installed: Vec<MethodRef>,
}

impl Transaction<'_> {
    /// Hooks `method`. Installing an already hooked method returns its existing record and
    /// ignores `payload`.
    pub fn install(
        &mut self,
        method: MethodRef,
        payload: Option<ObjectRef>,
    ) -> Result<&'static HookRecord> {
        let record = registry::install(&self.interceptor.shared, method, payload)?;
        if !self.installed.contains(&method) {
            self.installed.push(method);
        }
        Ok(record)
    }

    /// Resolves `name` + `signature` in `class` (or a superclass) and hooks it.
    pub fn install_by_name(
        &mut self,
        class: ClassRef,
        name: &str,
        signature: &str,
        payload: Option<ObjectRef>,
    ) -> Result<&'static HookRecord> {
        let rt = self.interceptor.runtime();
        let method = rt
            .resolve_method(class, name, signature)
            .ok_or_else(|| HookError::Unresolvable {
                class: rt.class_name(class),
                name: name.to_string(),
                signature: signature.to_string(),
            })?;
        self.install(method, payload)
    }

    /// Methods installed (or found already hooked) in this transaction.
    pub fn installed(&self) -> &[MethodRef] {
        &self.installed
    }

    /// Ends the transaction, returning how many methods it hooked.
    pub fn commit(self) -> usize {
        debug!("transaction committed: {} method(s)", self.installed.len());
        self.installed.len()
    }
}
