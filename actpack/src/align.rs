//! Power-of-two alignment helpers shared by every container builder.

/// Sector size every container data entry is aligned to.
pub const SECTOR_SIZE: usize = 512;

/// Rounds `value` down to a multiple of `align`.
///
/// `align` must be a power of two.
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align`.
///
/// `align` must be a power of two.
pub const fn align_up(value: usize, align: usize) -> usize {
    align_down(value + align - 1, align)
}

/// Number of filler bytes needed to bring `len` up to a multiple of `align`.
pub const fn pad_len(len: usize, align: usize) -> usize {
    align_up(len, align) - len
}

/// Whether `value` is a multiple of `align`.
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Extends `buf` with `fill` until its length is a multiple of `align`.
pub fn pad_to(buf: &mut Vec<u8>, align: usize, fill: u8) {
    let len = align_up(buf.len(), align);
    buf.resize(len, fill);
}
