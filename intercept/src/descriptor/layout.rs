use core::mem::{align_of, offset_of, size_of};

use super::MethodDescriptor;
use crate::error::LayoutError;

/// Revision of [`MethodDescriptor`] this crate is compiled against.
pub const DESCRIPTOR_LAYOUT_VERSION: u32 = 1;

/// Descriptor layout as reported by the runtime.
///
/// Checked once when an interceptor is created so a runtime whose descriptors differ from the
/// compiled-in struct is rejected before anything is patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLayout {
    pub version: u32,
    /// Allocation size of one descriptor. Vendor builds may append fields, so this can exceed
    /// the compiled struct.
    pub descriptor_size: usize,
    pub access_flags: usize,
    pub registers_size: usize,
    pub ins_size: usize,
    pub outs_size: usize,
    pub native_data: usize,
    pub entry_point: usize,
}

impl DescriptorLayout {
    /// The layout of the compiled-in [`MethodDescriptor`].
    pub const fn compiled() -> DescriptorLayout {
        DescriptorLayout {
            version: DESCRIPTOR_LAYOUT_VERSION,
            descriptor_size: size_of::<MethodDescriptor>(),
            access_flags: offset_of!(MethodDescriptor, access_flags),
            registers_size: offset_of!(MethodDescriptor, registers_size),
            ins_size: offset_of!(MethodDescriptor, ins_size),
            outs_size: offset_of!(MethodDescriptor, outs_size),
            native_data: offset_of!(MethodDescriptor, native_data),
            entry_point: offset_of!(MethodDescriptor, entry_point),
        }
    }

    /// Same layout with `extra` trailing bytes per descriptor.
    pub const fn with_trailing_bytes(mut self, extra: usize) -> DescriptorLayout {
        self.descriptor_size += extra;
        self
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let compiled = DescriptorLayout::compiled();
        if self.version != compiled.version {
            return Err(LayoutError::Version {
                expected: compiled.version,
                found: self.version,
            });
        }
        let fields = [
            ("access_flags", compiled.access_flags, self.access_flags),
            ("registers_size", compiled.registers_size, self.registers_size),
            ("ins_size", compiled.ins_size, self.ins_size),
            ("outs_size", compiled.outs_size, self.outs_size),
            ("native_data", compiled.native_data, self.native_data),
            ("entry_point", compiled.entry_point, self.entry_point),
        ];
        for (field, expected, found) in fields {
            if expected != found {
                return Err(LayoutError::FieldOffset {
                    field,
                    expected,
                    found,
                });
            }
        }
        if self.descriptor_size < compiled.descriptor_size {
            return Err(LayoutError::TooSmall {
                required: compiled.descriptor_size,
                found: self.descriptor_size,
            });
        }
        Ok(())
    }

    /// Bytes copied into a hook snapshot.
    #[inline]
    pub fn snapshot_copy_size(&self) -> usize {
        self.descriptor_size.max(size_of::<MethodDescriptor>())
    }

    /// Alignment required for a buffer that is reinterpreted as a descriptor.
    #[inline]
    pub const fn alignment() -> usize {
        align_of::<MethodDescriptor>()
    }
}
