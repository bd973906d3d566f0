//! Per-architecture constants for the managed runtime's quick calling convention.
//!
//! Every supported ISA is a row in one table; the visitor and frame accessors are generic over
//! [`AbiInfo`] so no code path is duplicated per architecture.

use core::fmt;
use core::str::FromStr;

use crate::error::HookError;

pub mod frame;

pub use frame::{STACK_REFERENCE_SIZE, STACK_SLOT_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Arm,
    Arm64,
    X86,
    X86_64,
    Mips,
}

impl Architecture {
    pub const ALL: [Architecture; 5] = [
        Architecture::Arm,
        Architecture::Arm64,
        Architecture::X86,
        Architecture::X86_64,
        Architecture::Mips,
    ];

    /// The architecture this crate was compiled for, if it is one of the supported five.
    pub fn host() -> Option<Architecture> {
        if cfg!(target_arch = "aarch64") {
            Some(Architecture::Arm64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Architecture::X86_64)
        } else if cfg!(target_arch = "arm") {
            Some(Architecture::Arm)
        } else if cfg!(target_arch = "x86") {
            Some(Architecture::X86)
        } else if cfg!(target_arch = "mips") {
            Some(Architecture::Mips)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Mips => "mips",
        }
    }

    #[inline]
    pub fn abi(self) -> &'static AbiInfo {
        match self {
            Architecture::Arm => &ARM,
            Architecture::Arm64 => &ARM64,
            Architecture::X86 => &X86,
            Architecture::X86_64 => &X86_64,
            Architecture::Mips => &MIPS,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arm" | "armv7" | "thumb2" => Ok(Architecture::Arm),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "mips" | "mipsel" => Ok(Architecture::Mips),
            _ => Err(HookError::UnsupportedArchitecture(s.to_string())),
        }
    }
}

/// Calling-convention and callee-save-frame constants of one architecture.
///
/// Spill masks list the registers saved by the "refs and args" callee-save frame, indexed by
/// register number; a register's slot in its spill area is its rank within the mask.
#[derive(Debug)]
pub struct AbiInfo {
    pub arch: Architecture,
    pub pointer_size: usize,
    /// Bytes per core-register spill slot.
    pub gpr_size: usize,
    /// Bytes per fp-register spill slot.
    pub fpr_size: usize,
    pub num_gpr_args: usize,
    pub num_fpr_args: usize,
    /// Floats and doubles travel in core registers / stack slots.
    pub soft_float: bool,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    /// Register numbers of the core argument registers, in argument order.
    pub gpr_arg_registers: &'static [u32],
    /// Fixed offset of the first argument register for frames that store them directly
    /// above the method slot rather than at the bottom of the core spill area.
    pub gpr1_offset_override: Option<usize>,
}

// ── ARM (thumb2, soft-float) ────────────────────────────────────────
//
// R0 = method, args in R1-R3, callee-save R5-R8, R10, R11, LR.

const ARM_CORE_MASK: u32 = (1 << 1)
    | (1 << 2)
    | (1 << 3)
    | (1 << 5)
    | (1 << 6)
    | (1 << 7)
    | (1 << 8)
    | (1 << 10)
    | (1 << 11)
    | (1 << 14);

pub const ARM: AbiInfo = AbiInfo {
    arch: Architecture::Arm,
    pointer_size: 4,
    gpr_size: 4,
    fpr_size: 4,
    num_gpr_args: 3,
    num_fpr_args: 0,
    soft_float: true,
    core_spill_mask: ARM_CORE_MASK,
    fp_spill_mask: 0,
    gpr_arg_registers: &[1, 2, 3],
    gpr1_offset_override: None,
};

// ── AArch64 ──────────────────────────────────────────────────────────
//
// X0 = method, args in X1-X7 and D0-D7, callee-save X20-X29, LR.

const ARM64_CORE_MASK: u32 = 0b1111_1110 | (0x3FF << 20) | (1 << 30);

pub const ARM64: AbiInfo = AbiInfo {
    arch: Architecture::Arm64,
    pointer_size: 8,
    gpr_size: 8,
    fpr_size: 8,
    num_gpr_args: 7,
    num_fpr_args: 8,
    soft_float: false,
    core_spill_mask: ARM64_CORE_MASK,
    fp_spill_mask: 0xFF,
    gpr_arg_registers: &[1, 2, 3, 4, 5, 6, 7],
    gpr1_offset_override: None,
};

// ── x86 ──────────────────────────────────────────────────────────────
//
// EAX = method, args in ECX, EDX, EBX; register 8 stands for the pushed return address.

const X86_CORE_MASK: u32 = (1 << 1) | (1 << 2) | (1 << 3) | (1 << 5) | (1 << 6) | (1 << 7) | (1 << 8);

pub const X86: AbiInfo = AbiInfo {
    arch: Architecture::X86,
    pointer_size: 4,
    gpr_size: 4,
    fpr_size: 4,
    num_gpr_args: 3,
    num_fpr_args: 0,
    soft_float: true,
    core_spill_mask: X86_CORE_MASK,
    fp_spill_mask: 0,
    gpr_arg_registers: &[1, 2, 3],
    gpr1_offset_override: None,
};

// ── x86_64 ───────────────────────────────────────────────────────────
//
// RDI = method, args in RSI, RDX, RCX, R8, R9 and XMM0-XMM7. The spill area is ordered by
// register number, so argument order and slot order differ. Register 16 is the return address.

const X86_64_CORE_MASK: u32 = (1 << 1)
    | (1 << 2)
    | (1 << 3)
    | (1 << 5)
    | (1 << 6)
    | (1 << 8)
    | (1 << 9)
    | (0xF << 12)
    | (1 << 16);

pub const X86_64: AbiInfo = AbiInfo {
    arch: Architecture::X86_64,
    pointer_size: 8,
    gpr_size: 8,
    fpr_size: 8,
    num_gpr_args: 5,
    num_fpr_args: 8,
    soft_float: false,
    core_spill_mask: X86_64_CORE_MASK,
    fp_spill_mask: 0xFF | (0xF << 12),
    gpr_arg_registers: &[6, 2, 1, 8, 9],
    gpr1_offset_override: None,
};

// ── MIPS (o32, soft-float) ───────────────────────────────────────────
//
// A0 = method, args in A1-A3, stored right above the method slot.

const MIPS_CORE_MASK: u32 = (0b111 << 5) | (0x3F << 18) | (1 << 28) | (1 << 30) | (1 << 31);

pub const MIPS: AbiInfo = AbiInfo {
    arch: Architecture::Mips,
    pointer_size: 4,
    gpr_size: 4,
    fpr_size: 4,
    num_gpr_args: 3,
    num_fpr_args: 0,
    soft_float: true,
    core_spill_mask: MIPS_CORE_MASK,
    fp_spill_mask: 0,
    gpr_arg_registers: &[5, 6, 7],
    gpr1_offset_override: Some(4),
};
