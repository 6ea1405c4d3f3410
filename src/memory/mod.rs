//! Packed item storage
//!
//! - [`buffer`] - the arena holding committed items back to back
//! - [`item`] - the item header shared by every record and its sub-items
//!
//! Every item starts on an [`ALIGN_BYTES`] boundary and its header carries its
//! padded size, which is the only way to find the next item.

pub mod buffer;
pub mod item;

pub use buffer::{AutoGrow, Buffer, DEFAULT_CAPACITY};
pub use item::{ItemRef, ItemType, Items, ITEM_HEADER_SIZE};

/// Alignment of every item and of the buffer offsets
pub const ALIGN_BYTES: usize = 8;

/// Round `length` up to the next multiple of [`ALIGN_BYTES`]
#[inline]
pub const fn padded_length(length: usize) -> usize {
    (length + ALIGN_BYTES - 1) & !(ALIGN_BYTES - 1)
}

#[inline]
pub(crate) const fn is_aligned(value: usize) -> bool {
    value % ALIGN_BYTES == 0
}

// Little-endian field access. Callers have already checked the bounds.

#[inline]
pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn read_i32(data: &[u8], at: usize) -> i32 {
    read_u32(data, at) as i32
}

#[inline]
pub(crate) fn read_i64(data: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    i64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_i32(data: &mut [u8], at: usize, value: i32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_i64(data: &mut [u8], at: usize, value: i64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_length() {
        assert_eq!(padded_length(0), 0);
        assert_eq!(padded_length(1), 8);
        assert_eq!(padded_length(8), 8);
        assert_eq!(padded_length(9), 16);
        assert_eq!(padded_length(63), 64);
    }

    #[test]
    fn test_field_access() {
        let mut data = vec![0u8; 16];
        write_u32(&mut data, 0, 0xDEAD_BEEF);
        write_i32(&mut data, 4, -7);
        write_i64(&mut data, 8, i64::MIN + 1);

        assert_eq!(read_u32(&data, 0), 0xDEAD_BEEF);
        assert_eq!(read_i32(&data, 4), -7);
        assert_eq!(read_i64(&data, 8), i64::MIN + 1);
    }
}
