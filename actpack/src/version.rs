//! Firmware version records.
//!
//! A firmware version is stored in two shapes:
//!
//! - the 64-byte block embedded in OTA headers (new and old version)
//! - the 128-byte `FVER` record written after the partition table in the
//!   SYS_PARAM file, which the boot loader reads at run time

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::checksum::crc32;
use crate::error::{Error, Result};
use crate::partition::PARTITION_TABLE_SIZE;

/// Size of the OTA header version block.
pub const OTA_VERSION_BLOCK_SIZE: usize = 64;
/// Size of the `FVER` record.
pub const VERSION_RECORD_SIZE: usize = 0x80;
/// `FVER` record magic.
pub const VERSION_RECORD_MAGIC: u32 = 0x5245_5646;

const OTA_NAME_LEN: usize = 32;
const OTA_BOARD_LEN: usize = 24;
const OTA_CODE_OFFSET: usize = 60;

const RECORD_NAME_OFFSET: usize = 12;
const RECORD_NAME_LEN: usize = 64;
const RECORD_BOARD_OFFSET: usize = 76;
const RECORD_BOARD_LEN: usize = 32;
const RECORD_CRC_OFFSET: usize = VERSION_RECORD_SIZE - 4;

/// Version information of one firmware build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Human readable version name.
    pub version_name: String,
    /// Board the firmware was built for.
    pub board_name: String,
    /// Monotonic version code compared by the update client.
    pub version_code: u32,
}

impl FirmwareVersion {
    /// Creates a version record.
    pub fn new(
        version_name: impl Into<String>,
        board_name: impl Into<String>,
        version_code: u32,
    ) -> Self {
        Self {
            version_name: version_name.into(),
            board_name: board_name.into(),
            version_code,
        }
    }

    /// Encodes the OTA header block: name[32], board[24], pad[4], code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] when a string does not fit its field.
    pub fn to_ota_block(&self) -> Result<[u8; OTA_VERSION_BLOCK_SIZE]> {
        let mut block = [0u8; OTA_VERSION_BLOCK_SIZE];
        put_str(&mut block[..OTA_NAME_LEN], "version name", &self.version_name)?;
        put_str(
            &mut block[OTA_NAME_LEN..OTA_NAME_LEN + OTA_BOARD_LEN],
            "board name",
            &self.board_name,
        )?;
        LittleEndian::write_u32(&mut block[OTA_CODE_OFFSET..], self.version_code);
        Ok(block)
    }

    /// Decodes an OTA header block; an all-zero block means "absent".
    pub fn from_ota_block(block: &[u8]) -> Option<Self> {
        let block = block.get(..OTA_VERSION_BLOCK_SIZE)?;
        if block.iter().all(|&b| b == 0) {
            return None;
        }
        Some(Self {
            version_name: get_str(&block[..OTA_NAME_LEN]),
            board_name: get_str(&block[OTA_NAME_LEN..OTA_NAME_LEN + OTA_BOARD_LEN]),
            version_code: LittleEndian::read_u32(&block[OTA_CODE_OFFSET..]),
        })
    }

    /// Encodes the 128-byte `FVER` record with its trailing CRC32.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] when a string does not fit its field.
    pub fn to_record(&self, sys_version_code: u32) -> Result<[u8; VERSION_RECORD_SIZE]> {
        let mut record = [0u8; VERSION_RECORD_SIZE];
        LittleEndian::write_u32(&mut record[0..], VERSION_RECORD_MAGIC);
        LittleEndian::write_u32(&mut record[4..], self.version_code);
        LittleEndian::write_u32(&mut record[8..], sys_version_code);
        put_str(
            &mut record[RECORD_NAME_OFFSET..RECORD_NAME_OFFSET + RECORD_NAME_LEN],
            "version name",
            &self.version_name,
        )?;
        put_str(
            &mut record[RECORD_BOARD_OFFSET..RECORD_BOARD_OFFSET + RECORD_BOARD_LEN],
            "board name",
            &self.board_name,
        )?;
        let crc = crc32(&record[..RECORD_CRC_OFFSET]);
        LittleEndian::write_u32(&mut record[RECORD_CRC_OFFSET..], crc);
        Ok(record)
    }

    /// Decodes and checks an `FVER` record.
    ///
    /// Returns the version together with the system version code.
    pub fn from_record(record: &[u8]) -> Result<(Self, u32)> {
        let record = record.get(..VERSION_RECORD_SIZE).ok_or(Error::Truncated {
            what: "firmware version record",
            need: VERSION_RECORD_SIZE,
            have: record.len(),
        })?;
        let magic = LittleEndian::read_u32(record);
        if magic != VERSION_RECORD_MAGIC {
            return Err(Error::BadMagic {
                expected: VERSION_RECORD_MAGIC.to_le_bytes().to_vec(),
                found: record[..4].to_vec(),
            });
        }
        let stored = LittleEndian::read_u32(&record[RECORD_CRC_OFFSET..]);
        let computed = crc32(&record[..RECORD_CRC_OFFSET]);
        if stored != computed {
            return Err(Error::checksum_mismatch("firmware version record", stored, computed));
        }

        let version = Self {
            version_code: LittleEndian::read_u32(&record[4..]),
            version_name: get_str(
                &record[RECORD_NAME_OFFSET..RECORD_NAME_OFFSET + RECORD_NAME_LEN],
            ),
            board_name: get_str(
                &record[RECORD_BOARD_OFFSET..RECORD_BOARD_OFFSET + RECORD_BOARD_LEN],
            ),
        };
        Ok((version, LittleEndian::read_u32(&record[8..])))
    }
}

/// Composes the SYS_PARAM file: the partition table followed by the `FVER`
/// record.
pub fn param_block(
    table: &[u8; PARTITION_TABLE_SIZE],
    record: &[u8; VERSION_RECORD_SIZE],
) -> Vec<u8> {
    let mut block = Vec::with_capacity(PARTITION_TABLE_SIZE + VERSION_RECORD_SIZE);
    block.extend_from_slice(table);
    block.extend_from_slice(record);
    block
}

fn put_str(field: &mut [u8], name: &'static str, value: &str) -> Result<()> {
    if value.len() > field.len() {
        return Err(Error::FieldTooLong {
            field: name,
            len: value.len(),
            max: field.len(),
        });
    }
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
