//! Reflected CRC16-CCITT as used by the chunk CRC of flash partitions.
//!
//! The register is a plain table driven reflected CRC-16 (poly 0x1021,
//! refin/refout). The value stored on flash is that register bit-reversed and
//! then byte-swapped, which is what the boot ROM compares against.

/// Generator polynomial in normal (MSB first) form.
pub const POLYNOMIAL: u16 = 0x1021;

/// Initial register value used for partition chunks.
pub const INIT: u16 = 0xffff;

const TABLE: [u16; 256] = {
    let poly = POLYNOMIAL.reverse_bits();
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the reflected CRC-16 register over `data`.
///
/// `init` is given in normal bit order and reflected before the first byte,
/// so `init = 0xffff` yields CRC-16/MCRF4XX.
pub fn crc16_register(data: &[u8], init: u16) -> u16 {
    data.iter().fold(init.reverse_bits(), |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ byte as u16) & 0xff) as usize]
    })
}

/// Computes the on-flash CRC16 of `data`.
///
/// # Example
///
/// ```rust
/// use actpack::checksum::crc16;
///
/// assert_eq!(crc16(b"123456789", 0xffff), 0xf689);
/// ```
pub fn crc16(data: &[u8], init: u16) -> u16 {
    crc16_register(data, init).reverse_bits().swap_bytes()
}
