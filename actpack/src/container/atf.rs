//! ATF (Actions test firmware) container.
//!
//! ```text
//! 0x00  magic "ACTTEST0"
//! 0x08  header checksum, CRC32 over [0x0c, data_start)
//! 0x0c  file count (u8)
//! 0x14  build time stamp, 10 ASCII bytes (yymmddHHMM)
//! 0x20  directory: name[12] checksum offset length load_addr run_addr
//! ```
//!
//! The header occupies directory slot 0, so the directory region is
//! `(count + 1) * 32` bytes rounded up to the sector size.

use byteorder::{ByteOrder, LittleEndian};

use crate::align::{SECTOR_SIZE, align_up, pad_to};
use crate::checksum::{crc32, sum32};
use crate::container::{
    ContainerEntry, ContainerFormat, DIR_ENTRY_SIZE, DirectoryBuilder, read_name, write_name,
};
use crate::error::{Error, Result};

/// ATF magic.
pub const ATF_MAGIC: &[u8; 8] = b"ACTTEST0";
/// Maximum number of files in an ATF image.
pub const ATF_MAX_FILES: usize = 15;
/// Length of the build time stamp field.
pub const BUILD_TIME_LEN: usize = 10;

const HEADER_SIZE: usize = 32;
const CHECKSUM_OFFSET: usize = 8;
const COUNT_OFFSET: usize = 12;
const BUILD_TIME_OFFSET: usize = 20;

/// Checksum stored in ATF directory entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryChecksum {
    /// CRC32 of the file content.
    #[default]
    Crc32,
    /// Sum of little-endian words, content zero padded to 4 bytes.
    Sum32,
}

impl EntryChecksum {
    fn compute(self, data: &[u8]) -> Result<u32> {
        match self {
            Self::Crc32 => Ok(crc32(data)),
            Self::Sum32 => {
                let mut words = data.to_vec();
                pad_to(&mut words, 4, 0);
                sum32(&words)
            }
        }
    }
}

/// ATF container format.
#[derive(Debug, Clone, Default)]
pub struct Atf {
    build_time: [u8; BUILD_TIME_LEN],
    checksum: EntryChecksum,
}

/// Builder for ATF images.
pub type AtfBuilder = DirectoryBuilder<Atf>;
/// Reader for ATF images.
pub type AtfReader<'a> = crate::container::ContainerReader<'a, Atf>;

impl Atf {
    /// Creates the format with CRC32 entry checksums and no time stamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a build time stamp such as `"2410161230"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldTooLong`] for stamps over 10 bytes.
    pub fn with_build_time(mut self, stamp: &str) -> Result<Self> {
        if stamp.len() > BUILD_TIME_LEN {
            return Err(Error::FieldTooLong {
                field: "build time",
                len: stamp.len(),
                max: BUILD_TIME_LEN,
            });
        }
        self.build_time = [0; BUILD_TIME_LEN];
        self.build_time[..stamp.len()].copy_from_slice(stamp.as_bytes());
        Ok(self)
    }

    /// Selects the directory checksum algorithm.
    pub fn with_entry_checksum(mut self, checksum: EntryChecksum) -> Self {
        self.checksum = checksum;
        self
    }

    /// Returns a builder for this format.
    pub fn builder(self) -> AtfBuilder {
        DirectoryBuilder::new(self)
    }

    /// Reads the build time stamp of an image, if one was recorded.
    pub fn build_time(image: &[u8]) -> Option<String> {
        let field = image.get(BUILD_TIME_OFFSET..BUILD_TIME_OFFSET + BUILD_TIME_LEN)?;
        let stamp = read_name(field);
        (!stamp.is_empty()).then_some(stamp)
    }
}

impl ContainerFormat for Atf {
    const NAME: &'static str = "ATF";
    const MAGIC: &'static [u8] = ATF_MAGIC;
    const HEADER_LEN: usize = HEADER_SIZE;
    const MAX_ENTRIES: usize = ATF_MAX_FILES;
    const DIR_OFFSET: usize = HEADER_SIZE;
    const DATA_FILL: u8 = 0xff;

    fn data_start(count: usize) -> usize {
        align_up((count + 1) * DIR_ENTRY_SIZE, SECTOR_SIZE)
    }

    fn read_count(header: &[u8]) -> usize {
        header[COUNT_OFFSET] as usize
    }

    fn encode_entry(entry: &ContainerEntry, slot: &mut [u8]) {
        write_name(slot, &entry.name);
        LittleEndian::write_u32(&mut slot[12..], entry.checksum);
        LittleEndian::write_u32(&mut slot[16..], entry.offset);
        LittleEndian::write_u32(&mut slot[20..], entry.length);
        LittleEndian::write_u32(&mut slot[24..], entry.load_addr);
        LittleEndian::write_u32(&mut slot[28..], entry.run_addr);
    }

    fn decode_entry(slot: &[u8]) -> ContainerEntry {
        ContainerEntry {
            name: read_name(&slot[..12]),
            checksum: LittleEndian::read_u32(&slot[12..]),
            offset: LittleEndian::read_u32(&slot[16..]),
            length: LittleEndian::read_u32(&slot[20..]),
            load_addr: LittleEndian::read_u32(&slot[24..]),
            run_addr: LittleEndian::read_u32(&slot[28..]),
        }
    }

    fn verify_header(image: &[u8]) -> Result<()> {
        let data_start = Self::data_start(Self::read_count(image));
        let span = image.get(COUNT_OFFSET..data_start).ok_or(Error::Truncated {
            what: "ATF header",
            need: data_start,
            have: image.len(),
        })?;
        let stored = LittleEndian::read_u32(&image[CHECKSUM_OFFSET..]);
        let computed = crc32(span);
        if stored != computed {
            return Err(Error::checksum_mismatch("ATF header", stored, computed));
        }
        Ok(())
    }

    fn entry_checksum(&self, data: &[u8]) -> Result<u32> {
        self.checksum.compute(data)
    }

    fn finish(&self, image: &mut [u8], count: usize) -> Result<()> {
        image[..ATF_MAGIC.len()].copy_from_slice(ATF_MAGIC);
        image[COUNT_OFFSET] = count as u8;
        image[BUILD_TIME_OFFSET..BUILD_TIME_OFFSET + BUILD_TIME_LEN]
            .copy_from_slice(&self.build_time);

        let data_start = Self::data_start(count);
        let checksum = crc32(&image[COUNT_OFFSET..data_start]);
        LittleEndian::write_u32(&mut image[CHECKSUM_OFFSET..], checksum);
        Ok(())
    }
}
