use std::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use super::{DescriptorLayout, MethodDescriptor, MethodRef};
use crate::error::RuntimeError;

/// Byte copy of a descriptor taken before it was patched.
///
/// The buffer is aligned for [`MethodDescriptor`] and at least as large as the runtime's
/// descriptor allocation, so it can stand in for the original method when invoked. Slack bytes
/// past the copied region are zeroed.
pub struct OriginalSnapshot {
    ptr: NonNull<u8>,
    layout: Layout,
    copied: usize,
}

impl OriginalSnapshot {
    /// # Safety
    /// `method` must be readable for `descriptor.snapshot_copy_size()` bytes.
    pub(crate) unsafe fn capture(
        method: MethodRef,
        descriptor: &DescriptorLayout,
        slack: usize,
    ) -> Result<OriginalSnapshot, RuntimeError> {
        let copied = descriptor.snapshot_copy_size();
        let layout = Layout::from_size_align(copied + slack, DescriptorLayout::alignment())
            .map_err(|_| RuntimeError::OutOfMemory("hook snapshot"))?;
        let ptr = NonNull::new(alloc_zeroed(layout))
            .ok_or(RuntimeError::OutOfMemory("hook snapshot"))?;
        core::ptr::copy_nonoverlapping(method.as_ptr() as *const u8, ptr.as_ptr(), copied);
        Ok(OriginalSnapshot {
            ptr,
            layout,
            copied,
        })
    }

    #[inline]
    pub fn descriptor(&self) -> &MethodDescriptor {
        // SAFETY: aligned, large enough, and initialized from a live descriptor.
        unsafe { &*(self.ptr.as_ptr() as *const MethodDescriptor) }
    }

    /// The snapshot as a callable method.
    #[inline]
    pub fn method_ref(&self) -> MethodRef {
        // Snapshots owned by published hook records are never dropped.
        MethodRef(self.ptr.cast())
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the whole buffer was allocated zeroed.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    #[inline]
    pub fn copied_len(&self) -> usize {
        self.copied
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for OriginalSnapshot {
    fn drop(&mut self) {
        // SAFETY: allocated in `capture` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

unsafe impl Send for OriginalSnapshot {}
unsafe impl Sync for OriginalSnapshot {}
