//! Partition table embedded at the start of the SYS_PARAM file.
//!
//! ```text
//! 0x000  magic "ACPT", version, table size, count, entry size, reserved[4]
//! 0x010  15 entries of 24 bytes
//! 0x178  reserved[4]
//! 0x17c  CRC32 over [0x000, 0x17c)
//! ```

use std::{fmt, io::Cursor, str::FromStr};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Deserialize;

use crate::checksum::crc32;
use crate::error::{Error, Result};

/// Size of the encoded table.
pub const PARTITION_TABLE_SIZE: usize = 0x180;
/// Table magic, "ACPT" in little-endian order.
pub const PARTITION_TABLE_MAGIC: u32 = 0x5450_4341;
/// Maximum number of partitions.
pub const MAX_PARTITIONS: usize = 15;
/// Partition address and size alignment.
pub const PARTITION_ALIGNMENT: u32 = 0x1000;

const TABLE_VERSION: u16 = 0x0100;
const ENTRY_SIZE: usize = 0x18;
const ENTRIES_OFFSET: usize = 0x10;
const CRC_OFFSET: usize = PARTITION_TABLE_SIZE - 4;
const NAME_LEN: usize = 8;
const DEFAULT_MIRROR_ID: u8 = 0xf;

/// Partition type as stored in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
#[repr(u8)]
pub enum PartitionType {
    Reserved = 0,
    Boot = 1,
    System = 2,
    Recovery = 3,
    Data = 4,
    Temp = 5,
    SysParam = 6,
}

impl PartitionType {
    const ALL: [Self; 7] = [
        Self::Reserved,
        Self::Boot,
        Self::System,
        Self::Recovery,
        Self::Data,
        Self::Temp,
        Self::SysParam,
    ];

    /// Name used in firmware descriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "RESERVED",
            Self::Boot => "BOOT",
            Self::System => "SYSTEM",
            Self::Recovery => "RECOVERY",
            Self::Data => "DATA",
            Self::Temp => "TEMP",
            Self::SysParam => "SYS_PARAM",
        }
    }

    /// Decodes the on-disk type byte.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| *t as u8 == raw)
            .ok_or_else(|| Error::UnknownPartitionType(raw.to_string()))
    }

    /// Whether the partition must be encrypted when the image requires it.
    pub fn needs_encryption(self) -> bool {
        matches!(
            self,
            Self::Boot | Self::System | Self::Recovery | Self::SysParam
        )
    }
}

impl FromStr for PartitionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownPartitionType(s.to_string()))
    }
}

impl TryFrom<String> for PartitionType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Per-partition feature flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PartitionFlags: u8 {
        /// The partition file carries chunk CRC16 trailers.
        const CRC = 0x1;
        /// The partition file is encrypted.
        const ENCRYPTION = 0x2;
        /// The boot loader checks the partition before running it.
        const BOOT_CHECK = 0x4;
    }
}

/// One partition of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub part_type: PartitionType,
    pub file_id: u8,
    /// 4-bit mirror id, 0xf when the partition has no mirror.
    pub mirror_id: u8,
    /// 4-bit storage device id.
    pub storage_id: u8,
    pub flags: PartitionFlags,
    pub address: u32,
    pub size: u32,
    /// Where the partition file starts, inside `[address, address + size)`.
    pub file_address: u32,
}

impl PartitionEntry {
    /// Creates a partition whose file starts at the partition address.
    pub fn new(name: impl Into<String>, part_type: PartitionType, address: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            part_type,
            file_id: 0,
            mirror_id: DEFAULT_MIRROR_ID,
            storage_id: 0,
            flags: PartitionFlags::empty(),
            address,
            size,
            file_address: address,
        }
    }

    pub fn with_file_id(mut self, file_id: u8) -> Self {
        self.file_id = file_id;
        self
    }

    pub fn with_file_address(mut self, file_address: u32) -> Self {
        self.file_address = file_address;
        self
    }

    pub fn with_mirror_id(mut self, mirror_id: u8) -> Self {
        self.mirror_id = mirror_id;
        self
    }

    pub fn with_storage_id(mut self, storage_id: u8) -> Self {
        self.storage_id = storage_id;
        self
    }

    pub fn with_flags(mut self, flags: PartitionFlags) -> Self {
        self.flags = flags;
        self
    }

    fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }

    /// Checks name, ids, alignment and the file address range.
    pub fn validate(&self) -> Result<()> {
        if self.name.len() > NAME_LEN {
            return Err(Error::name_too_long(&self.name, NAME_LEN));
        }
        for (what, value) in [("mirror_id", self.mirror_id), ("storage_id", self.storage_id)] {
            if value > 0xf {
                return Err(Error::IdOutOfRange {
                    name: self.name.clone(),
                    what,
                    value,
                });
            }
        }
        for (what, value) in [("address", self.address), ("size", self.size)] {
            if value % PARTITION_ALIGNMENT != 0 {
                return Err(Error::Unaligned {
                    name: self.name.clone(),
                    what,
                    value,
                    align: PARTITION_ALIGNMENT,
                });
            }
        }
        if self.file_address < self.address || self.file_address as u64 >= self.end() {
            return Err(Error::FileAddressOutOfRange {
                name: self.name.clone(),
                file_address: self.file_address,
                address: self.address,
                end: self.end(),
            });
        }
        Ok(())
    }

    /// Largest file that fits between `file_address` and the partition end.
    pub fn max_file_size(&self) -> u64 {
        self.end().saturating_sub(self.file_address as u64)
    }

    /// Checks that a partition file of `file_size` bytes fits.
    ///
    /// # Errors
    ///
    /// [`Error::FileAddressOutOfRange`] for a bad file address and
    /// [`Error::FileTooLarge`] when the file overruns the partition.
    pub fn check_file_fits(&self, file_size: u64) -> Result<()> {
        if self.file_address < self.address || self.file_address as u64 >= self.end() {
            return Err(Error::FileAddressOutOfRange {
                name: self.name.clone(),
                file_address: self.file_address,
                address: self.address,
                end: self.end(),
            });
        }

        let max = self.max_file_size();
        info!(
            "partition {}: file size {file_size:#x} ({} KB), max size {max:#x} ({} KB)",
            self.name,
            file_size / 1024,
            max / 1024
        );
        if file_size > max {
            return Err(Error::FileTooLarge {
                name: self.name.clone(),
                size: file_size,
                max,
            });
        }
        Ok(())
    }

    fn write(&self, slot: &mut [u8]) -> Result<()> {
        slot[..NAME_LEN].fill(0);
        slot[..self.name.len()].copy_from_slice(self.name.as_bytes());

        let mut w = Cursor::new(&mut slot[NAME_LEN..]);
        w.write_u8(self.part_type as u8)?;
        w.write_u8(self.file_id)?;
        w.write_u8((self.mirror_id & 0xf) | (self.storage_id << 4))?;
        w.write_u8(self.flags.bits())?;
        w.write_u32::<LittleEndian>(self.address)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.file_address)?;
        Ok(())
    }

    fn read(slot: &[u8]) -> Result<Self> {
        let end = slot[..NAME_LEN]
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&slot[..end]).into_owned();

        let mut r = Cursor::new(&slot[NAME_LEN..]);
        let part_type = PartitionType::from_raw(r.read_u8()?)?;
        let file_id = r.read_u8()?;
        let ids = r.read_u8()?;
        let flags = PartitionFlags::from_bits_retain(r.read_u8()?);
        Ok(Self {
            name,
            part_type,
            file_id,
            mirror_id: ids & 0xf,
            storage_id: ids >> 4,
            flags,
            address: r.read_u32::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
            file_address: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Partition table builder and parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
    encryption_required: bool,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires BOOT, SYSTEM, RECOVERY and SYS_PARAM partitions to carry the
    /// encryption flag.
    pub fn with_encryption_required(mut self, required: bool) -> Self {
        self.encryption_required = required;
        self
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Looks up a partition by name.
    pub fn find(&self, name: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Appends a validated partition.
    pub fn push(&mut self, entry: PartitionEntry) -> Result<&mut Self> {
        entry.validate()?;
        if self.entries.len() >= MAX_PARTITIONS {
            return Err(Error::TooManyEntries {
                count: self.entries.len() + 1,
                max: MAX_PARTITIONS,
            });
        }
        debug!(
            "partition [{}] {} {} mirror id {:#x}",
            self.entries.len(),
            entry.name,
            entry.part_type,
            entry.mirror_id
        );
        self.entries.push(entry);
        Ok(self)
    }

    /// Encodes the table and its trailing CRC32.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionRequired`] when encryption is required and a
    /// boot critical partition does not enable it.
    pub fn encode(&self) -> Result<[u8; PARTITION_TABLE_SIZE]> {
        if self.encryption_required {
            if let Some(entry) = self.entries.iter().find(|e| {
                e.part_type.needs_encryption() && !e.flags.contains(PartitionFlags::ENCRYPTION)
            }) {
                return Err(Error::EncryptionRequired(entry.name.clone()));
            }
        }

        let mut table = [0u8; PARTITION_TABLE_SIZE];
        {
            let mut w = Cursor::new(&mut table[..ENTRIES_OFFSET]);
            w.write_u32::<LittleEndian>(PARTITION_TABLE_MAGIC)?;
            w.write_u16::<LittleEndian>(TABLE_VERSION)?;
            w.write_u16::<LittleEndian>(PARTITION_TABLE_SIZE as u16)?;
            w.write_u16::<LittleEndian>(self.entries.len() as u16)?;
            w.write_u16::<LittleEndian>(ENTRY_SIZE as u16)?;
        }

        for (entry, slot) in self
            .entries
            .iter()
            .zip(table[ENTRIES_OFFSET..CRC_OFFSET].chunks_exact_mut(ENTRY_SIZE))
        {
            entry.write(slot)?;
        }

        let crc = crc32(&table[..CRC_OFFSET]);
        table[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        Ok(table)
    }

    /// Parses and verifies an encoded table.
    ///
    /// # Errors
    ///
    /// Fails on a bad magic, a CRC mismatch, an out of range count or an
    /// unknown partition type.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let data = data.get(..PARTITION_TABLE_SIZE).ok_or(Error::Truncated {
            what: "partition table",
            need: PARTITION_TABLE_SIZE,
            have: data.len(),
        })?;

        let mut r = Cursor::new(data);
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != PARTITION_TABLE_MAGIC {
            return Err(Error::BadMagic {
                expected: PARTITION_TABLE_MAGIC.to_le_bytes().to_vec(),
                found: data[..4].to_vec(),
            });
        }

        let stored = (&data[CRC_OFFSET..]).read_u32::<LittleEndian>()?;
        let computed = crc32(&data[..CRC_OFFSET]);
        if stored != computed {
            return Err(Error::checksum_mismatch("partition table", stored, computed));
        }

        let _version = r.read_u16::<LittleEndian>()?;
        let _table_size = r.read_u16::<LittleEndian>()?;
        let count = r.read_u16::<LittleEndian>()? as usize;
        if count > MAX_PARTITIONS {
            return Err(Error::TooManyEntries {
                count,
                max: MAX_PARTITIONS,
            });
        }

        let entries = data[ENTRIES_OFFSET..]
            .chunks_exact(ENTRY_SIZE)
            .take(count)
            .map(PartitionEntry::read)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entries,
            encryption_required: false,
        })
    }
}
