//! Layout of the "refs and args" callee-save frame built by the quick-to-hook stub.
//!
//! From the stack pointer upwards the frame holds the callee method reference, padding, the fp
//! spill area, the core spill area (ending with the return address) and, above the frame, the
//! caller's outgoing argument area.

use super::AbiInfo;

/// Size of one caller stack-argument slot.
pub const STACK_SLOT_SIZE: usize = 4;

/// Size of the compressed method reference at the bottom of every quick frame.
pub const STACK_REFERENCE_SIZE: usize = 4;

#[inline]
const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Rank of `reg` within `mask`, i.e. its slot index in the spill area.
#[inline]
const fn spill_rank(mask: u32, reg: u32) -> usize {
    (mask & ((1u32 << reg) - 1)).count_ones() as usize
}

impl AbiInfo {
    #[inline]
    pub const fn core_spill_count(&self) -> usize {
        self.core_spill_mask.count_ones() as usize
    }

    #[inline]
    pub const fn fp_spill_count(&self) -> usize {
        self.fp_spill_mask.count_ones() as usize
    }

    /// Spill areas plus the method slot, rounded up to the 16-byte stack alignment.
    pub const fn frame_size(&self) -> usize {
        round_up(
            (self.core_spill_count() + self.fp_spill_count() + 1) * self.pointer_size,
            16,
        )
    }

    /// Offset of the first (lowest) core spill slot.
    pub const fn gpr1_offset(&self) -> usize {
        match self.gpr1_offset_override {
            Some(off) => off,
            None => self.frame_size() - self.core_spill_count() * self.gpr_size,
        }
    }

    /// Offset of the first fp spill slot.
    pub const fn fpr1_offset(&self) -> usize {
        self.frame_size()
            - self.core_spill_count() * self.gpr_size
            - self.fp_spill_count() * self.fpr_size
    }

    /// Offset of the saved return address, the topmost slot of the frame.
    pub const fn lr_offset(&self) -> usize {
        self.frame_size() - self.pointer_size
    }

    /// Start of the caller's stack arguments. Soft-float callers reserve slots for the
    /// register arguments, hard-float callers only for the method reference.
    pub const fn stack_args_offset(&self) -> usize {
        let reserved = if self.soft_float {
            self.num_gpr_args * self.gpr_size
        } else {
            0
        };
        self.frame_size() + reserved + STACK_REFERENCE_SIZE
    }

    /// Offset of the `index`th core argument register's spill slot.
    pub fn gpr_arg_offset(&self, index: usize) -> usize {
        let reg = self.gpr_arg_registers[index];
        let rank = match self.gpr1_offset_override {
            // Argument registers are stored contiguously in argument order.
            Some(_) => index,
            None => spill_rank(self.core_spill_mask, reg),
        };
        self.gpr1_offset() + rank * self.gpr_size
    }

    /// Offset of the `index`th fp argument register's spill slot.
    pub const fn fpr_arg_offset(&self, index: usize) -> usize {
        self.fpr1_offset() + index * self.fpr_size
    }

    /// Offset of the `index`th 4-byte caller stack slot.
    pub const fn stack_arg_offset(&self, index: usize) -> usize {
        self.stack_args_offset() + index * STACK_SLOT_SIZE
    }
}
