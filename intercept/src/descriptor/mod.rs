//! The runtime's per-method metadata record and the typed handle wrapping it.

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicUsize, Ordering};

use crate::error::HookError;
use crate::types::{ClassRef, Shorty};

pub mod layout;
pub mod patcher;
pub mod snapshot;

pub use layout::{DescriptorLayout, DESCRIPTOR_LAYOUT_VERSION};
pub use snapshot::OriginalSnapshot;

/// Access flag bits stored in [`MethodDescriptor::access_flags`].
pub mod access {
    pub const PUBLIC: u32 = 0x0001;
    pub const PRIVATE: u32 = 0x0002;
    pub const PROTECTED: u32 = 0x0004;
    pub const STATIC: u32 = 0x0008;
    pub const FINAL: u32 = 0x0010;
    pub const SYNCHRONIZED: u32 = 0x0020;
    pub const NATIVE: u32 = 0x0100;
    pub const INTERFACE: u32 = 0x0200;
    pub const ABSTRACT: u32 = 0x0400;
    pub const CONSTRUCTOR: u32 = 0x0001_0000;
}

/// Method metadata as laid out by the runtime.
///
/// Fields the patcher writes are atomics so a concurrently dispatching thread never observes a
/// torn word. The runtime may allocate descriptors larger than this struct; the trailing bytes
/// are opaque and only ever copied.
#[repr(C)]
pub struct MethodDescriptor {
    pub declaring_class: u32,
    pub access_flags: AtomicU32,
    /// Index into the declaring class's vtable.
    pub method_index: u32,
    /// Index of the method in its declaring file; identifies the method across copies.
    pub method_id: u32,
    pub registers_size: AtomicU16,
    pub ins_size: AtomicU16,
    pub outs_size: AtomicU16,
    _reserved: u16,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub shorty: *const u8,
    pub shorty_len: usize,
    /// Interpreter code item, or zero for methods without bytecode.
    pub code_item: usize,
    /// Native function for native methods; carries the hook record once hooked.
    pub native_data: AtomicUsize,
    /// Compiled code the runtime dispatches to.
    pub entry_point: AtomicUsize,
}

impl MethodDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        declaring_class: ClassRef,
        access_flags: u32,
        method_index: u32,
        method_id: u32,
        shorty: &'static str,
        registers_size: u16,
        ins_size: u16,
        code_item: usize,
        entry_point: usize,
    ) -> MethodDescriptor {
        MethodDescriptor {
            declaring_class: declaring_class.raw(),
            access_flags: AtomicU32::new(access_flags),
            method_index,
            method_id,
            registers_size: AtomicU16::new(registers_size),
            ins_size: AtomicU16::new(ins_size),
            outs_size: AtomicU16::new(0),
            _reserved: 0,
            frame_size: 0,
            core_spill_mask: 0,
            fp_spill_mask: 0,
            shorty: shorty.as_ptr(),
            shorty_len: shorty.len(),
            code_item,
            native_data: AtomicUsize::new(0),
            entry_point: AtomicUsize::new(entry_point),
        }
    }

    #[inline]
    pub fn access_flags(&self) -> u32 {
        self.access_flags.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.access_flags() & access::STATIC != 0
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        self.access_flags() & access::NATIVE != 0
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.access_flags() & access::ABSTRACT != 0
    }

    #[inline]
    pub fn entry_point(&self) -> usize {
        self.entry_point.load(Ordering::Acquire)
    }

    pub fn declaring_class(&self) -> Option<ClassRef> {
        ClassRef::from_raw(self.declaring_class)
    }

    pub fn shorty_bytes(&self) -> &[u8] {
        if self.shorty.is_null() {
            return &[];
        }
        // SAFETY: the runtime keeps shorty strings alive for the lifetime of the method.
        unsafe { core::slice::from_raw_parts(self.shorty, self.shorty_len) }
    }

    pub fn shorty(&self) -> Result<Shorty, HookError> {
        let bytes = self.shorty_bytes();
        let s = core::str::from_utf8(bytes)
            .map_err(|_| HookError::InvalidShorty(String::from_utf8_lossy(bytes).into_owned()))?;
        Shorty::parse(s)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("declaring_class", &self.declaring_class)
            .field("access_flags", &format_args!("{:#x}", self.access_flags()))
            .field("method_id", &self.method_id)
            .field("shorty", &String::from_utf8_lossy(self.shorty_bytes()))
            .field("entry_point", &format_args!("{:#x}", self.entry_point()))
            .finish()
    }
}

/// Handle to a runtime-owned [`MethodDescriptor`].
///
/// Descriptors are never freed while their class is loaded, and classes holding hooked methods
/// are never unloaded, so the handle may be copied and shared freely once created.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef(NonNull<MethodDescriptor>);

impl MethodRef {
    /// # Safety
    /// `ptr` must point to a live descriptor that outlives every use of the returned handle.
    #[inline]
    pub unsafe fn from_raw(ptr: *const MethodDescriptor) -> Option<MethodRef> {
        NonNull::new(ptr as *mut MethodDescriptor).map(MethodRef)
    }

    #[inline]
    pub fn as_ptr(self) -> *const MethodDescriptor {
        self.0.as_ptr()
    }

    #[inline]
    pub fn address(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub fn descriptor(&self) -> &MethodDescriptor {
        // SAFETY: guaranteed by the `from_raw` contract.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodRef({:#x})", self.address())
    }
}

// Descriptors are shared runtime metadata; every mutable field is atomic.
unsafe impl Send for MethodRef {}
unsafe impl Sync for MethodRef {}
unsafe impl Send for MethodDescriptor {}
unsafe impl Sync for MethodDescriptor {}
