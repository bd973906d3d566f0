//! Maps a shorty onto argument locations of the quick calling convention.

use crate::arch::{AbiInfo, Architecture};
use crate::types::{Shorty, TypeTag};

/// Where one argument arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    /// Index into the ABI's core argument registers.
    CoreRegister(usize),
    /// Index into the ABI's fp argument registers.
    FloatRegister(usize),
    /// Index of a 4-byte slot in the caller's stack-argument area.
    Stack(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentSlot {
    pub tag: TypeTag,
    pub location: ArgLocation,
    /// A wide value whose low half is in the last core register and whose high half is in
    /// [`ArgumentSlot::high_half`].
    pub is_split: bool,
}

impl ArgumentSlot {
    /// Location of the high 32 bits of a split value.
    #[inline]
    pub fn high_half(&self) -> Option<ArgLocation> {
        self.is_split.then_some(ArgLocation::Stack(0))
    }
}

/// Walks a signature with three independent cursors (core register, fp register and stack
/// slot), producing one [`ArgumentSlot`] per argument in declaration order.
pub struct CallingConventionVisitor {
    abi: &'static AbiInfo,
    gpr: usize,
    fpr: usize,
    stack: usize,
}

impl CallingConventionVisitor {
    pub fn new(arch: Architecture) -> Self {
        CallingConventionVisitor {
            abi: arch.abi(),
            gpr: 0,
            fpr: 0,
            stack: 0,
        }
    }

    /// Receiver (for instance methods) followed by every declared parameter.
    pub fn visit(mut self, shorty: &Shorty, is_static: bool) -> Vec<ArgumentSlot> {
        let mut slots = Vec::with_capacity(shorty.params().len() + usize::from(!is_static));
        if !is_static {
            slots.push(self.narrow(TypeTag::Reference));
        }
        for &tag in shorty.params() {
            let slot = match tag {
                TypeTag::Float if !self.abi.soft_float => self.hard_float(),
                TypeTag::Double if !self.abi.soft_float => self.hard_double(),
                TypeTag::Long | TypeTag::Double => self.wide(tag),
                _ => self.narrow(tag),
            };
            slots.push(slot);
        }
        slots
    }

    #[inline]
    fn gprs_left(&self) -> bool {
        self.gpr < self.abi.num_gpr_args
    }

    #[inline]
    fn fprs_left(&self) -> bool {
        self.fpr < self.abi.num_fpr_args
    }

    fn core_or_stack(&self) -> ArgLocation {
        if self.gprs_left() {
            ArgLocation::CoreRegister(self.gpr)
        } else {
            ArgLocation::Stack(self.stack)
        }
    }

    /// References, 32-bit integers, and floats on soft-float ABIs.
    fn narrow(&mut self, tag: TypeTag) -> ArgumentSlot {
        let location = self.core_or_stack();
        if !self.abi.soft_float || !self.gprs_left() {
            self.stack += 1;
        }
        if self.gprs_left() {
            self.gpr += 1;
        }
        ArgumentSlot {
            tag,
            location,
            is_split: false,
        }
    }

    /// Longs, and doubles on soft-float ABIs.
    fn wide(&mut self, tag: TypeTag) -> ArgumentSlot {
        let is_split = self.abi.gpr_size == 4 && self.gpr + 1 == self.abi.num_gpr_args;
        let location = self.core_or_stack();
        if !self.abi.soft_float || !self.gprs_left() {
            self.stack += 2;
        }
        if self.gprs_left() {
            self.gpr += 1;
            if self.abi.gpr_size == 4 {
                if self.gprs_left() {
                    self.gpr += 1;
                } else if self.abi.soft_float {
                    // The high half spilled into the first stack slot.
                    self.stack += 1;
                }
            }
        }
        ArgumentSlot {
            tag,
            location,
            is_split,
        }
    }

    fn hard_float(&mut self) -> ArgumentSlot {
        let location = if self.fprs_left() {
            ArgLocation::FloatRegister(self.fpr)
        } else {
            ArgLocation::Stack(self.stack)
        };
        if self.fprs_left() {
            self.fpr += 1;
        }
        self.stack += 1;
        ArgumentSlot {
            tag: TypeTag::Float,
            location,
            is_split: false,
        }
    }

    fn hard_double(&mut self) -> ArgumentSlot {
        let is_split = self.abi.fpr_size == 4 && self.fpr + 1 == self.abi.num_fpr_args;
        let location = if self.fprs_left() {
            ArgLocation::FloatRegister(self.fpr)
        } else {
            ArgLocation::Stack(self.stack)
        };
        self.stack += 2;
        if self.fprs_left() {
            self.fpr += 1;
            if self.abi.fpr_size == 4 && self.fprs_left() {
                self.fpr += 1;
            }
        }
        ArgumentSlot {
            tag: TypeTag::Double,
            location,
            is_split,
        }
    }
}
