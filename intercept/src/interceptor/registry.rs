//! Hook records and the structural "is this method hooked" check.

use core::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, warn};

use super::dispatch::quick_dispatch_entry;
use super::visitor::{ArgumentSlot, CallingConventionVisitor};
use super::Shared;
use crate::descriptor::patcher::patch_entry_point;
use crate::descriptor::{MethodRef, OriginalSnapshot};
use crate::error::{HookError, Result};
use crate::runtime::{GlobalHandle, ManagedRuntime};
use crate::types::{ObjectRef, Shorty};

/// Everything a hooked method needs at call time. Published once per method and never freed.
pub struct HookRecord {
    method: MethodRef,
    original: OriginalSnapshot,
    reflected: GlobalHandle,
    payload: Option<GlobalHandle>,
    shorty: Shorty,
    is_static: bool,
    slots: Vec<ArgumentSlot>,
    shared: Arc<Shared>,
}

impl HookRecord {
    /// The live (patched) method.
    #[inline]
    pub fn method(&self) -> MethodRef {
        self.method
    }

    /// The pre-hook copy of the method, callable in place of the original.
    #[inline]
    pub fn original(&self) -> MethodRef {
        self.original.method_ref()
    }

    #[inline]
    pub fn snapshot(&self) -> &OriginalSnapshot {
        &self.original
    }

    pub fn reflected(&self) -> Option<ObjectRef> {
        self.reflected.get(self.shared.runtime.as_ref())
    }

    pub fn payload(&self) -> Option<ObjectRef> {
        self.payload
            .and_then(|p| p.get(self.shared.runtime.as_ref()))
    }

    #[inline]
    pub fn shorty(&self) -> &Shorty {
        &self.shorty
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Argument locations of a call to this method, receiver first.
    #[inline]
    pub fn slots(&self) -> &[ArgumentSlot] {
        &self.slots
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn discard(self) {
        let rt = self.shared.runtime.as_ref();
        self.reflected.release(rt);
        if let Some(p) = self.payload {
            p.release(rt);
        }
    }
}

/// Address every hooked method's entry point is set to.
#[inline]
pub fn trampoline_address() -> usize {
    quick_dispatch_entry as usize
}

#[inline]
pub fn is_hooked(method: MethodRef) -> bool {
    method.descriptor().entry_point() == trampoline_address()
}

/// The record of a hooked method.
pub fn record_of(method: MethodRef) -> Option<&'static HookRecord> {
    if !is_hooked(method) {
        return None;
    }
    let ptr = method.descriptor().native_data.load(Ordering::Acquire) as *const HookRecord;
    // SAFETY: the entry point is only set to the trampoline after the record pointer was
    // published, and published records are never freed.
    unsafe { ptr.as_ref() }
}

pub(crate) fn describe(rt: &dyn ManagedRuntime, method: MethodRef) -> String {
    let class = method
        .descriptor()
        .declaring_class()
        .map(|c| rt.class_name(c))
        .unwrap_or_else(|| "?".to_string());
    format!("{class}.{}", rt.method_name(method))
}

/// Hooks `method`, or returns its existing record.
pub(crate) fn install(
    shared: &Arc<Shared>,
    method: MethodRef,
    payload: Option<ObjectRef>,
) -> Result<&'static HookRecord> {
    if let Some(existing) = record_of(method) {
        debug!("{method:?} already hooked");
        return Ok(existing);
    }

    let rt = shared.runtime.as_ref();
    let desc = method.descriptor();
    if desc.is_abstract() {
        return Err(HookError::AbstractMethod(describe(rt, method)));
    }
    let Some(class) = desc.declaring_class() else {
        return Err(HookError::Unresolvable {
            class: "?".to_string(),
            name: rt.method_name(method),
            signature: rt.method_signature(method),
        });
    };
    let shorty = desc.shorty()?;

    // Class initialization and reflection may move the payload, so pin it first.
    let payload = payload.map(|p| GlobalHandle::new(rt, Some(p)));
    let release_payload = || {
        if let Some(p) = payload {
            p.release(rt);
        }
    };

    // Static methods may still point at the runtime's resolution stub until their class is
    // initialized, so initialize before taking the snapshot.
    if desc.is_static() && !rt.is_initialized(class) {
        if let Err(e) = rt.initialize_class(class) {
            release_payload();
            return Err(e.into());
        }
    }

    // SAFETY: the layout was validated against this runtime when the interceptor was created.
    let captured =
        unsafe { OriginalSnapshot::capture(method, &shared.layout, shared.config.snapshot_slack) };
    let original = match captured {
        Ok(original) => original,
        Err(e) => {
            release_payload();
            return Err(e.into());
        }
    };
    let expected_data = original.descriptor().native_data.load(Ordering::Relaxed);

    let reflected = match rt.reflect_method(method) {
        Ok(obj) => GlobalHandle::new(rt, Some(obj)),
        Err(e) => {
            release_payload();
            return Err(e.into());
        }
    };

    let is_static = desc.is_static();
    let slots = CallingConventionVisitor::new(shared.arch).visit(&shorty, is_static);
    let record = Box::into_raw(Box::new(HookRecord {
        method,
        original,
        reflected,
        payload,
        shorty,
        is_static,
        slots,
        shared: Arc::clone(shared),
    }));

    match patch_entry_point(
        method,
        shared.config.patch_style,
        expected_data,
        record as usize,
        trampoline_address(),
    ) {
        Ok(()) => {
            debug!("hooked {}", describe(rt, method));
            // SAFETY: published; leaked for the lifetime of the process.
            Ok(unsafe { &*record })
        }
        Err(lost) => {
            // SAFETY: never published, so this is still the only pointer to the record.
            unsafe { Box::from_raw(record) }.discard();
            if let Some(existing) = record_of(method) {
                return Ok(existing);
            }
            warn!(
                "lost install race for {} (native data now {:#x})",
                describe(rt, method),
                lost.current
            );
            Err(HookError::InstallRace(describe(rt, method)))
        }
    }
}
