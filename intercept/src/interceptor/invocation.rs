//! Raw access to a hooked call's callee-save frame.

use core::marker::PhantomData;

use crate::arch::{AbiInfo, Architecture, STACK_REFERENCE_SIZE};
use crate::interceptor::visitor::{ArgLocation, ArgumentSlot};
use crate::types::{raw_ref, ObjectRef, Value};

/// A "refs and args" frame, addressed from its stack pointer.
///
/// All supported architectures are little-endian; every read and write is unaligned-safe.
pub struct CallFrame<'a> {
    sp: *mut u8,
    abi: &'static AbiInfo,
    _frame: PhantomData<&'a mut [u8]>,
}

impl<'a> CallFrame<'a> {
    /// # Safety
    /// `sp` must point to a callee-save frame for `arch`, followed by the caller's stack
    /// arguments, and stay valid and exclusively borrowed for `'a`.
    pub unsafe fn from_raw(sp: *mut u8, arch: Architecture) -> CallFrame<'a> {
        CallFrame {
            sp,
            abi: arch.abi(),
            _frame: PhantomData,
        }
    }

    #[inline]
    pub fn abi(&self) -> &'static AbiInfo {
        self.abi
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.sp
    }

    pub fn offset_of(&self, location: ArgLocation) -> usize {
        match location {
            ArgLocation::CoreRegister(i) => self.abi.gpr_arg_offset(i),
            ArgLocation::FloatRegister(i) => self.abi.fpr_arg_offset(i),
            ArgLocation::Stack(i) => self.abi.stack_arg_offset(i),
        }
    }

    #[inline]
    fn read_u32(&self, offset: usize) -> u32 {
        // SAFETY: offsets come from the ABI table and lie within the frame or its argument area.
        u32::from_le(unsafe { core::ptr::read_unaligned(self.sp.add(offset) as *const u32) })
    }

    #[inline]
    fn read_u64(&self, offset: usize) -> u64 {
        // SAFETY: as in `read_u32`.
        u64::from_le(unsafe { core::ptr::read_unaligned(self.sp.add(offset) as *const u64) })
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        // SAFETY: as in `read_u32`; the frame is exclusively borrowed.
        unsafe { core::ptr::write_unaligned(self.sp.add(offset) as *mut u32, value.to_le()) }
    }

    #[inline]
    fn write_u64(&mut self, offset: usize, value: u64) {
        // SAFETY: as in `write_u32`.
        unsafe { core::ptr::write_unaligned(self.sp.add(offset) as *mut u64, value.to_le()) }
    }

    /// Raw bits of an argument. Narrow kinds are zero-extended; a split value is reassembled
    /// from its register (low half) and stack (high half) words.
    pub fn read_raw(&self, slot: &ArgumentSlot) -> u64 {
        let offset = self.offset_of(slot.location);
        match slot.high_half() {
            Some(high) => {
                let low = self.read_u32(offset) as u64;
                let high = self.read_u32(self.offset_of(high)) as u64;
                low | (high << 32)
            }
            None if slot.tag.is_wide() => self.read_u64(offset),
            None => self.read_u32(offset) as u64,
        }
    }

    pub fn write_raw(&mut self, slot: &ArgumentSlot, raw: u64) {
        let offset = self.offset_of(slot.location);
        match slot.high_half() {
            Some(high) => {
                self.write_u32(offset, raw as u32);
                let high_offset = self.offset_of(high);
                self.write_u32(high_offset, (raw >> 32) as u32);
            }
            None if slot.tag.is_wide() => self.write_u64(offset, raw),
            None => self.write_u32(offset, raw as u32),
        }
    }

    #[inline]
    pub fn read_value(&self, slot: &ArgumentSlot) -> Value {
        Value::from_raw(slot.tag, self.read_raw(slot))
    }

    /// Overwrites a reference argument, e.g. after the collector moved it.
    #[inline]
    pub fn write_reference(&mut self, slot: &ArgumentSlot, obj: Option<ObjectRef>) {
        self.write_raw(slot, raw_ref(obj) as u64);
    }

    /// Compressed reference of the method this frame belongs to.
    #[inline]
    pub fn method_slot(&self) -> u32 {
        self.read_u32(0)
    }

    /// Return address saved at the top of the frame.
    pub fn return_pc(&self) -> usize {
        let offset = self.abi.lr_offset();
        if self.abi.pointer_size == 8 {
            self.read_u64(offset) as usize
        } else {
            self.read_u32(offset) as usize
        }
    }

    /// Compressed reference of the calling method, stored at the caller's stack pointer.
    #[inline]
    pub fn caller_method_slot(&self) -> u32 {
        self.read_u32(self.abi.frame_size())
    }

    /// Bytes from the stack pointer to the end of the last stack slot used by `slots`.
    pub fn required_size(abi: &AbiInfo, slots: &[ArgumentSlot]) -> usize {
        let stack_end = slots
            .iter()
            .filter_map(|s| match s.location {
                ArgLocation::Stack(i) => Some(i + if s.tag.is_wide() { 2 } else { 1 }),
                _ if s.is_split => Some(1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        (abi.stack_args_offset() + stack_end * crate::arch::STACK_SLOT_SIZE)
            .max(abi.frame_size() + STACK_REFERENCE_SIZE)
    }
}
