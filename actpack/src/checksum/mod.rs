//! Checksum engine.
//!
//! All checksums used by the container formats are pure functions over byte
//! slices:
//!
//! - [`crc32`] - zlib CRC32, used for directory entries, headers and the
//!   partition table
//! - [`crc16`] - reflected CRC16-CCITT appended to partition data chunks
//! - [`crc8_maxim`] - CRC-8/MAXIM for the NVRAM segment header and items
//! - [`sum32`] - little-endian 32-bit word sum of the legacy ATF directory

use byteorder::{ByteOrder, LittleEndian};
use crc::{CRC_32_ISO_HDLC, Crc};

use crate::error::{Error, Result};

mod crc16;
mod crc8;

pub use crc16::{INIT as CRC16_INIT, crc16, crc16_register};
pub use crc8::crc8_maxim;

/// Chunk size used when appending CRC16 trailers to partition files.
pub const DEFAULT_CRC_CHUNK: usize = 32;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the zlib compatible CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Adds up `data` as little-endian `u32` words, wrapping on overflow.
///
/// # Errors
///
/// Returns [`Error::UnalignedBuffer`] when the length is not a multiple of 4;
/// the caller has to pad first.
pub fn sum32(data: &[u8]) -> Result<u32> {
    if data.len() % 4 != 0 {
        return Err(Error::UnalignedBuffer {
            len: data.len(),
            unit: 4,
        });
    }

    Ok(data
        .chunks_exact(4)
        .fold(0u32, |sum, word| sum.wrapping_add(LittleEndian::read_u32(word))))
}

/// Splits `data` into `chunk_size` pieces and appends the CRC16 of each one.
///
/// The last piece is zero padded to a full chunk before its CRC is taken, so
/// the result is always `chunks * (chunk_size + 2)` bytes long.
pub fn add_chunk_crc(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunks = data.len().div_ceil(chunk_size);
    let mut out = Vec::with_capacity(chunks * (chunk_size + 2));

    for piece in data.chunks(chunk_size) {
        let start = out.len();
        out.extend_from_slice(piece);
        out.resize(start + chunk_size, 0);
        let crc = crc16(&out[start..], CRC16_INIT);
        out.extend_from_slice(&crc.to_le_bytes());
    }

    out
}

/// Strips the CRC16 trailers added by [`add_chunk_crc`], checking each one.
///
/// The zero padding of the final chunk is kept because the original length
/// is not recorded in the chunked layout.
///
/// # Errors
///
/// Returns [`Error::Truncated`] when the length is not a whole number of
/// chunks, or [`Error::ChecksumMismatch`] for the first bad chunk.
pub fn strip_chunk_crc(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let unit = chunk_size + 2;
    if data.len() % unit != 0 {
        return Err(Error::Truncated {
            what: "chunked data",
            need: data.len().div_ceil(unit) * unit,
            have: data.len(),
        });
    }

    let mut out = Vec::with_capacity(data.len() / unit * chunk_size);
    for (index, piece) in data.chunks_exact(unit).enumerate() {
        let (chunk, trailer) = piece.split_at(chunk_size);
        let stored = LittleEndian::read_u16(trailer);
        let computed = crc16(chunk, CRC16_INIT);
        if stored != computed {
            return Err(Error::checksum_mismatch(
                format!("chunk {index}"),
                stored as u32,
                computed as u32,
            ));
        }
        out.extend_from_slice(chunk);
    }

    Ok(out)
}
