//! Entry-point patching of live method descriptors.
//!
//! A patch is published in two steps. The descriptor's native-data word is claimed with a
//! compare-and-swap from the value captured in the snapshot to the hook record; only the winner
//! goes on to rewrite the dispatch fields and release-store the trampoline into the entry point.
//! Readers that acquire-load the trampoline therefore always see a fully written record.

use core::sync::atomic::Ordering;

use log::{debug, trace};

use super::{access, MethodRef};

/// How a hooked method is routed to the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchStyle {
    /// Compiled-code backends: the entry point is called directly, so the method must not be
    /// treated as native.
    #[default]
    CompiledEntry,
    /// Interpreter backends: the method is turned into a native bridge whose frame holds only
    /// its incoming arguments.
    NativeBridge,
}

impl PatchStyle {
    pub fn name(self) -> &'static str {
        match self {
            PatchStyle::CompiledEntry => "compiled-entry",
            PatchStyle::NativeBridge => "native-bridge",
        }
    }

    pub fn parse(s: &str) -> Option<PatchStyle> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compiled" | "compiled-entry" | "quick" => Some(PatchStyle::CompiledEntry),
            "native" | "native-bridge" | "bridge" => Some(PatchStyle::NativeBridge),
            _ => None,
        }
    }

    fn apply(self, method: MethodRef) {
        let desc = method.descriptor();
        match self {
            PatchStyle::CompiledEntry => {
                desc.access_flags.fetch_and(!access::NATIVE, Ordering::AcqRel);
            }
            PatchStyle::NativeBridge => {
                desc.access_flags.fetch_or(access::NATIVE, Ordering::AcqRel);
                let ins = desc.ins_size.load(Ordering::Acquire);
                desc.registers_size.store(ins, Ordering::Release);
                desc.outs_size.store(0, Ordering::Release);
            }
        }
    }
}

/// The descriptor's native-data word changed between snapshot and claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLost {
    pub current: usize,
}

/// Claim `method` for `record` and redirect it to `trampoline`.
///
/// `expected_data` is the native-data word observed when the snapshot was taken. On failure
/// nothing has been written.
pub(crate) fn patch_entry_point(
    method: MethodRef,
    style: PatchStyle,
    expected_data: usize,
    record: usize,
    trampoline: usize,
) -> Result<(), ClaimLost> {
    let desc = method.descriptor();
    desc.native_data
        .compare_exchange(expected_data, record, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|current| {
            trace!("claim of {method:?} lost: native data {current:#x}");
            ClaimLost { current }
        })?;

    style.apply(method);
    let previous = desc.entry_point.swap(trampoline, Ordering::Release);
    debug!(
        "patched {method:?} ({}): entry {previous:#x} -> {trampoline:#x}",
        style.name()
    );
    Ok(())
}
