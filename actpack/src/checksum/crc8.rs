//! CRC-8/MAXIM (x^8 + x^5 + x^4 + 1, reflected, init 0).
//!
//! Computed one nibble at a time with two 16 entry tables, the same way the
//! NVRAM driver on the device does it.

const POLY_REFLECTED: u8 = 0x31u8.reverse_bits();

const fn byte_crc(mut crc: u8) -> u8 {
    let mut bit = 0;
    while bit < 8 {
        crc = if crc & 1 != 0 {
            (crc >> 1) ^ POLY_REFLECTED
        } else {
            crc >> 1
        };
        bit += 1;
    }
    crc
}

/// `[0..16]` handles the low nibble, `[16..32]` the high nibble.
const NIBBLE_TABLE: [u8; 32] = {
    let mut table = [0u8; 32];
    let mut i = 0;
    while i < 16 {
        table[i] = byte_crc(i as u8);
        table[16 + i] = byte_crc((i as u8) << 4);
        i += 1;
    }
    table
};

/// Computes CRC-8/MAXIM over `data`.
pub fn crc8_maxim(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        let crc = crc ^ byte;
        NIBBLE_TABLE[(crc & 0x0f) as usize] ^ NIBBLE_TABLE[16 + (crc >> 4) as usize]
    })
}
