//! Register access and field decoding
//!
//! A block reads its metrics either through its driver or directly from a
//! register window. Direct reads fetch `size` bytes at `offset` (plus
//! `size * index` for array elements) and extract the field with [`decode`].
//!
//! Registers are read in native byte order, the same way a volatile load of
//! the register width would see them.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

/// Register sizes supported by direct decoding, in bytes
pub const SUPPORTED_SIZES: [usize; 4] = [1, 2, 4, 8];

/// Location and shape of a metric's register field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterField {
    /// Byte offset of the first register from the block base
    pub offset: usize,
    /// Register size in bytes (1, 2, 4 or 8)
    pub size: usize,
    /// Field width in bits (0 = whole register, no shift or mask)
    pub width: u32,
    /// Right shift applied before masking
    pub shift: u32,
    /// Invert the register bits before extracting the field
    pub invert: bool,
}

impl RegisterField {
    /// Whole-register field at `offset`
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            ..Default::default()
        }
    }

    /// Bit field of `width` bits starting at bit `shift`
    pub fn bits(offset: usize, size: usize, shift: u32, width: u32) -> Self {
        Self {
            offset,
            size,
            width,
            shift,
            invert: false,
        }
    }

    /// Same field with inverted register bits
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Byte offset of array element `index`
    pub fn element_offset(&self, index: usize) -> usize {
        self.offset + self.size * index
    }

    /// Bits a decoded value can occupy: the field width, else the register size
    pub fn value_mask(&self) -> u64 {
        if self.width > 0 {
            field_mask(self.width)
        } else {
            field_mask(8 * self.size as u32)
        }
    }

    /// Bits of the declared field, all ones for a whole register
    pub fn width_mask(&self) -> u64 {
        if self.width > 0 {
            field_mask(self.width)
        } else {
            u64::MAX
        }
    }
}

/// Extract a field from raw register bytes.
///
/// `raw` holds at least `size` bytes in native order. Inversion applies to the
/// full register width; the shift and mask only apply when `width > 0`.
pub fn decode(raw: &[u8], size: usize, shift: u32, width: u32, invert: bool) -> Result<u64> {
    if raw.len() < size {
        return Err(StatsError::InvalidSpec(format!(
            "register read of {} bytes returned {}",
            size,
            raw.len()
        )));
    }

    let (mut value, register_mask) = match size {
        1 => (u64::from(raw[0]), u64::from(u8::MAX)),
        2 => (
            u64::from(u16::from_ne_bytes([raw[0], raw[1]])),
            u64::from(u16::MAX),
        ),
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(&raw[..4]);
            (u64::from(u32::from_ne_bytes(b)), u64::from(u32::MAX))
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[..8]);
            (u64::from_ne_bytes(b), u64::MAX)
        }
        _ => return Err(StatsError::UnsupportedSize(size)),
    };

    if invert {
        value = !value & register_mask;
    }

    if width > 0 {
        value = value.checked_shr(shift).unwrap_or(0) & field_mask(width);
    }

    Ok(value)
}

fn field_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Byte-addressed register window of a block
pub trait RegisterIo: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset` from the window base.
    ///
    /// Out-of-window reads are a programming error and must not return.
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Window length in bytes
    fn len(&self) -> usize;

    /// Whether the window is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register window backed by ordinary memory.
///
/// Clones share the same storage, so a simulator or test can write registers
/// while a domain samples them.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MemoryRegion {
    /// Create a zero-filled window of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(vec![0; len])),
        }
    }

    /// Write raw bytes at `offset`
    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        let mut bytes = self
            .bytes
            .write()
            .unwrap_or_else(|e| crate::fatal!("register window lock poisoned: {}", e));
        let end = offset + data.len();
        if end > bytes.len() {
            crate::fatal!(
                "register write of {} bytes at 0x{:x} outside {}-byte window",
                data.len(),
                offset,
                bytes.len()
            );
        }
        bytes[offset..end].copy_from_slice(data);
    }

    /// Write an 8-bit register
    pub fn write_u8(&self, offset: usize, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    /// Write a 16-bit register
    pub fn write_u16(&self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }

    /// Write a 32-bit register
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }

    /// Write a 64-bit register
    pub fn write_u64(&self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_ne_bytes());
    }
}

impl RegisterIo for MemoryRegion {
    fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self
            .bytes
            .read()
            .unwrap_or_else(|e| crate::fatal!("register window lock poisoned: {}", e));
        let end = offset + buf.len();
        if end > bytes.len() {
            crate::fatal!(
                "register read of {} bytes at 0x{:x} outside {}-byte window",
                buf.len(),
                offset,
                bytes.len()
            );
        }
        buf.copy_from_slice(&bytes[offset..end]);
    }

    fn len(&self) -> usize {
        self.bytes
            .read()
            .unwrap_or_else(|e| crate::fatal!("register window lock poisoned: {}", e))
            .len()
    }
}

/// Register window over memory-mapped device registers.
///
/// Each read is a single volatile load of the requested width.
#[derive(Debug)]
pub struct MmioRegion {
    base: *const u8,
    len: usize,
}

// SAFETY: the constructor's contract makes the mapping valid for the lifetime
// of the region and device registers tolerate concurrent loads.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    ///
    /// `base` must point to `len` bytes of mapped device memory that stays
    /// mapped for the lifetime of the returned value, and every register must
    /// be naturally aligned for its size.
    pub unsafe fn new(base: *const u8, len: usize) -> Self {
        Self { base, len }
    }
}

impl RegisterIo for MmioRegion {
    fn read(&self, offset: usize, buf: &mut [u8]) {
        if offset + buf.len() > self.len {
            crate::fatal!(
                "mmio read of {} bytes at 0x{:x} outside {}-byte window",
                buf.len(),
                offset,
                self.len
            );
        }

        // SAFETY: bounds checked above, mapping and alignment guaranteed by `new`.
        unsafe {
            let addr = self.base.add(offset);
            match buf.len() {
                1 => buf[0] = std::ptr::read_volatile(addr),
                2 => buf.copy_from_slice(
                    &std::ptr::read_volatile(addr as *const u16).to_ne_bytes(),
                ),
                4 => buf.copy_from_slice(
                    &std::ptr::read_volatile(addr as *const u32).to_ne_bytes(),
                ),
                8 => buf.copy_from_slice(
                    &std::ptr::read_volatile(addr as *const u64).to_ne_bytes(),
                ),
                n => crate::fatal!("unsupported mmio read width {} at 0x{:x}", n, offset),
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_8bit() {
        let raw = [0xa5u8];
        assert_eq!(decode(&raw, 1, 0, 0, false).unwrap(), 0xa5);
        assert_eq!(decode(&raw, 1, 0, 0, true).unwrap(), 0x5a);
        assert_eq!(decode(&raw, 1, 4, 4, false).unwrap(), 0xa);
    }

    #[test]
    fn test_decode_16bit() {
        let raw = 0xbeefu16.to_ne_bytes();
        assert_eq!(decode(&raw, 2, 0, 0, false).unwrap(), 0xbeef);
        assert_eq!(decode(&raw, 2, 8, 8, false).unwrap(), 0xbe);
        assert_eq!(decode(&raw, 2, 0, 0, true).unwrap(), 0x4110);
    }

    #[test]
    fn test_decode_32bit_sysmon_field() {
        // 10-bit ADC code stored in bits [15:6]
        let raw = 0x0000_2800u32.to_ne_bytes();
        assert_eq!(decode(&raw, 4, 6, 10, false).unwrap(), 0x0a0);

        let raw = 0x0002_8000u32.to_ne_bytes();
        assert_eq!(decode(&raw, 4, 6, 10, false).unwrap(), 0x200);
    }

    #[test]
    fn test_decode_64bit() {
        let raw = 0xdead_beef_0000_0001u64.to_ne_bytes();
        assert_eq!(decode(&raw, 8, 0, 0, false).unwrap(), 0xdead_beef_0000_0001);
        assert_eq!(decode(&raw, 8, 32, 32, false).unwrap(), 0xdead_beef);
        assert_eq!(decode(&raw, 8, 0, 64, false).unwrap(), 0xdead_beef_0000_0001);
        assert_eq!(decode(&raw, 8, 0, 0, true).unwrap(), 0x2152_4110_ffff_fffe);
    }

    #[test]
    fn test_decode_flag_bit() {
        let raw = [0b0000_0010u8];
        assert_eq!(decode(&raw, 1, 1, 1, false).unwrap(), 1);
        assert_eq!(decode(&raw, 1, 0, 1, false).unwrap(), 0);
        // Active-low status bit
        assert_eq!(decode(&raw, 1, 1, 1, true).unwrap(), 0);
    }

    #[test]
    fn test_decode_unsupported_size() {
        let raw = [0u8; 8];
        assert!(matches!(
            decode(&raw, 3, 0, 0, false),
            Err(StatsError::UnsupportedSize(3))
        ));
    }

    #[test]
    fn test_decode_short_buffer() {
        let raw = [0u8; 2];
        assert!(decode(&raw, 4, 0, 0, false).is_err());
    }

    #[test]
    fn test_register_field_element_offset() {
        let field = RegisterField::new(0x100, 4);
        assert_eq!(field.element_offset(0), 0x100);
        assert_eq!(field.element_offset(3), 0x10c);
    }

    #[test]
    fn test_memory_region_read_write() {
        let region = MemoryRegion::new(16);
        region.write_u32(4, 0x1234_5678);
        region.write_u8(15, 0xff);

        let mut buf = [0u8; 4];
        region.read(4, &mut buf);
        assert_eq!(u32::from_ne_bytes(buf), 0x1234_5678);

        let mut byte = [0u8; 1];
        region.read(15, &mut byte);
        assert_eq!(byte[0], 0xff);
        assert_eq!(region.len(), 16);
    }

    #[test]
    fn test_memory_region_clones_share_storage() {
        let region = MemoryRegion::new(8);
        let writer = region.clone();
        writer.write_u64(0, 42);

        let mut buf = [0u8; 8];
        region.read(0, &mut buf);
        assert_eq!(u64::from_ne_bytes(buf), 42);
    }

    #[test]
    #[should_panic(expected = "outside 8-byte window")]
    fn test_memory_region_out_of_bounds() {
        let region = MemoryRegion::new(8);
        let mut buf = [0u8; 4];
        region.read(6, &mut buf);
    }

    #[test]
    fn test_mmio_region_reads_backing_memory() {
        let backing: Vec<u32> = vec![0, 0xcafe_f00d];
        let region = unsafe { MmioRegion::new(backing.as_ptr() as *const u8, 8) };

        let mut buf = [0u8; 4];
        region.read(4, &mut buf);
        assert_eq!(u32::from_ne_bytes(buf), 0xcafe_f00d);
    }
}
