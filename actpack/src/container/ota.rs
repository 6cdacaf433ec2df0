//! OTA update container.
//!
//! ```text
//! 0x000  header (0x40): magic "AOTA", header checksum, sizes, data checksum
//! 0x040  new firmware version block (64 bytes)
//! 0x080  old firmware version block (64 bytes, patch images only)
//! 0x200  directory: name[12] rsv[4] offset length rsv[4] checksum
//! 0x400  data, every file zero padded to 512 bytes
//! ```
//!
//! The header checksum is a CRC32 over `[0x08, 0x400)`; the data checksum is
//! a CRC32 over the padded data region.

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::crc32;
use crate::container::{
    ContainerEntry, ContainerFormat, ContainerReader, DirectoryBuilder, read_name, write_name,
};
use crate::error::{Error, Result};
use crate::version::{FirmwareVersion, OTA_VERSION_BLOCK_SIZE};

/// OTA magic.
pub const OTA_MAGIC: &[u8; 4] = b"AOTA";
/// Manifest every OTA image must carry.
pub const OTA_MANIFEST: &str = "ota.xml";
/// Maximum number of files in an OTA image.
pub const OTA_MAX_FILES: usize = 14;

const HEADER_VERSION: u16 = 0x0100;
const HEADER_SIZE: usize = 0x40;
const DIR_OFFSET: usize = 0x200;
const DATA_OFFSET: usize = 0x400;
const NEW_VERSION_OFFSET: usize = 0x40;
const OLD_VERSION_OFFSET: usize = 0x80;
const CHECKED_SPAN: usize = 8;

/// OTA container format.
#[derive(Debug, Clone, Default)]
pub struct Ota {
    new_version: FirmwareVersion,
    old_version: Option<FirmwareVersion>,
}

/// Builder for OTA images.
pub type OtaBuilder = DirectoryBuilder<Ota>;
/// Reader for OTA images.
pub type OtaReader<'a> = ContainerReader<'a, Ota>;

impl Ota {
    /// Creates a full-update format carrying `new_version`.
    pub fn new(new_version: FirmwareVersion) -> Self {
        Self {
            new_version,
            old_version: None,
        }
    }

    /// Marks the image as a patch from `old_version`.
    pub fn with_old_version(mut self, old_version: FirmwareVersion) -> Self {
        self.old_version = Some(old_version);
        self
    }

    /// Returns a builder for this format.
    pub fn builder(self) -> OtaBuilder {
        DirectoryBuilder::new(self)
    }
}

impl ContainerFormat for Ota {
    const NAME: &'static str = "OTA";
    const MAGIC: &'static [u8] = OTA_MAGIC;
    const HEADER_LEN: usize = HEADER_SIZE;
    const MAX_ENTRIES: usize = OTA_MAX_FILES;
    const DIR_OFFSET: usize = DIR_OFFSET;
    const DATA_FILL: u8 = 0;

    fn data_start(_count: usize) -> usize {
        DATA_OFFSET
    }

    fn read_count(header: &[u8]) -> usize {
        LittleEndian::read_u16(&header[12..]) as usize
    }

    fn dir_offset(header: &[u8]) -> usize {
        match LittleEndian::read_u16(&header[16..]) as usize {
            0 => DIR_OFFSET,
            offset => offset,
        }
    }

    fn encode_entry(entry: &ContainerEntry, slot: &mut [u8]) {
        write_name(slot, &entry.name);
        LittleEndian::write_u32(&mut slot[16..], entry.offset);
        LittleEndian::write_u32(&mut slot[20..], entry.length);
        LittleEndian::write_u32(&mut slot[28..], entry.checksum);
    }

    fn decode_entry(slot: &[u8]) -> ContainerEntry {
        ContainerEntry {
            name: read_name(&slot[..12]),
            offset: LittleEndian::read_u32(&slot[16..]),
            length: LittleEndian::read_u32(&slot[20..]),
            checksum: LittleEndian::read_u32(&slot[28..]),
            ..Default::default()
        }
    }

    fn verify_header(image: &[u8]) -> Result<()> {
        let header = OtaHeader::parse(image)?;

        let computed = crc32(&image[CHECKED_SPAN..DATA_OFFSET]);
        if header.header_checksum != computed {
            return Err(Error::checksum_mismatch(
                "OTA header",
                header.header_checksum,
                computed,
            ));
        }

        let data_end = header.data_size as usize;
        let data_start = header.data_offset as usize;
        let data = image.get(data_start..data_end).ok_or(Error::Truncated {
            what: "OTA data region",
            need: data_end,
            have: image.len(),
        })?;
        let computed = crc32(data);
        if header.data_checksum != computed {
            return Err(Error::checksum_mismatch(
                "OTA data",
                header.data_checksum,
                computed,
            ));
        }
        Ok(())
    }

    fn validate(&self, names: &[&str]) -> Result<()> {
        if !names.contains(&OTA_MANIFEST) {
            return Err(Error::MissingRequiredFile(OTA_MANIFEST.to_string()));
        }
        self.new_version.to_ota_block()?;
        if let Some(old) = &self.old_version {
            old.to_ota_block()?;
        }
        Ok(())
    }

    fn finish(&self, image: &mut [u8], count: usize) -> Result<()> {
        let data_size = u32::try_from(image.len()).map_err(|_| Error::FileTooLarge {
            name: "OTA image".to_string(),
            size: image.len() as u64,
            max: u32::MAX as u64,
        })?;

        image[..OTA_MAGIC.len()].copy_from_slice(OTA_MAGIC);
        LittleEndian::write_u16(&mut image[8..], HEADER_VERSION);
        LittleEndian::write_u16(&mut image[10..], DATA_OFFSET as u16);
        LittleEndian::write_u16(&mut image[12..], count as u16);
        LittleEndian::write_u16(&mut image[14..], 0);
        LittleEndian::write_u16(&mut image[16..], DIR_OFFSET as u16);
        LittleEndian::write_u16(&mut image[18..], DATA_OFFSET as u16);
        LittleEndian::write_u32(&mut image[20..], data_size);
        let data_checksum = crc32(&image[DATA_OFFSET..]);
        LittleEndian::write_u32(&mut image[24..], data_checksum);

        image[NEW_VERSION_OFFSET..NEW_VERSION_OFFSET + OTA_VERSION_BLOCK_SIZE]
            .copy_from_slice(&self.new_version.to_ota_block()?);
        if let Some(old) = &self.old_version {
            image[OLD_VERSION_OFFSET..OLD_VERSION_OFFSET + OTA_VERSION_BLOCK_SIZE]
                .copy_from_slice(&old.to_ota_block()?);
        }

        let header_checksum = crc32(&image[CHECKED_SPAN..DATA_OFFSET]);
        LittleEndian::write_u32(&mut image[4..], header_checksum);
        debug!(
            "OTA: header checksum {header_checksum:#010x}, data checksum {data_checksum:#010x}"
        );
        Ok(())
    }
}

/// Decoded OTA header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaHeader {
    pub header_checksum: u32,
    pub header_version: u16,
    pub header_size: u16,
    pub file_count: u16,
    pub flag: u16,
    pub dir_offset: u16,
    pub data_offset: u16,
    pub data_size: u32,
    pub data_checksum: u32,
    pub new_version: Option<FirmwareVersion>,
    /// Present on patch images.
    pub old_version: Option<FirmwareVersion>,
}

impl OtaHeader {
    /// Parses the header and both version blocks.
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < OTA_MAGIC.len() || &image[..OTA_MAGIC.len()] != OTA_MAGIC {
            return Err(Error::BadMagic {
                expected: OTA_MAGIC.to_vec(),
                found: image[..OTA_MAGIC.len().min(image.len())].to_vec(),
            });
        }
        if image.len() < DATA_OFFSET {
            return Err(Error::Truncated {
                what: "OTA header",
                need: DATA_OFFSET,
                have: image.len(),
            });
        }

        Ok(Self {
            header_checksum: LittleEndian::read_u32(&image[4..]),
            header_version: LittleEndian::read_u16(&image[8..]),
            header_size: LittleEndian::read_u16(&image[10..]),
            file_count: LittleEndian::read_u16(&image[12..]),
            flag: LittleEndian::read_u16(&image[14..]),
            dir_offset: LittleEndian::read_u16(&image[16..]),
            data_offset: LittleEndian::read_u16(&image[18..]),
            data_size: LittleEndian::read_u32(&image[20..]),
            data_checksum: LittleEndian::read_u32(&image[24..]),
            new_version: FirmwareVersion::from_ota_block(&image[NEW_VERSION_OFFSET..]),
            old_version: FirmwareVersion::from_ota_block(&image[OLD_VERSION_OFFSET..]),
        })
    }

    /// Whether the image is a patch.
    pub fn is_patch(&self) -> bool {
        self.old_version.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EntryInput;

    fn version(code: u32) -> FirmwareVersion {
        FirmwareVersion::new(format!("1.0.{code}"), "ats2853", code)
    }

    fn sample_image(format: Ota) -> Vec<u8> {
        let mut builder = format.builder();
        builder
            .add(EntryInput::new("app.bin", vec![0x5a; 700]))
            .unwrap()
            .add(EntryInput::new(OTA_MANIFEST, b"<ota/>".to_vec()))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_layout() {
        let image = sample_image(Ota::new(version(2)));
        assert_eq!(image.len(), 0x400 + 1024 + 512);
        assert_eq!(&image[..4], b"AOTA");

        let header = OtaHeader::parse(&image).unwrap();
        assert_eq!(header.header_version, 0x0100);
        assert_eq!(header.header_size, 0x400);
        assert_eq!(header.file_count, 2);
        assert_eq!(header.dir_offset, 0x200);
        assert_eq!(header.data_offset, 0x400);
        assert_eq!(header.data_size as usize, image.len());
        assert_eq!(header.data_checksum, crc32(&image[0x400..]));
        assert_eq!(header.header_checksum, crc32(&image[8..0x400]));
        assert_eq!(header.new_version, Some(version(2)));
        assert!(!header.is_patch());

        let reader = OtaReader::parse(&image).unwrap();
        let entries = reader.entries();
        assert_eq!(entries[0].offset, 0x400);
        assert_eq!(entries[1].offset, 0x400 + 1024);
        assert_eq!(entries[1].checksum, crc32(b"<ota/>"));
        assert_eq!(reader.data(&entries[1]).unwrap(), b"<ota/>");
        assert!(image[0x400 + 700..0x800].iter().all(|&b| b == 0));
        reader.verify().unwrap();
    }

    #[test]
    fn test_patch_header_carries_old_version() {
        let image = sample_image(Ota::new(version(3)).with_old_version(version(2)));
        let header = OtaHeader::parse(&image).unwrap();
        assert!(header.is_patch());
        assert_eq!(header.old_version, Some(version(2)));
        assert_eq!(header.new_version, Some(version(3)));
    }

    #[test]
    fn test_manifest_required() {
        let mut builder = Ota::new(version(1)).builder();
        builder.add(EntryInput::new("app.bin", vec![1])).unwrap();
        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::MissingRequiredFile(name) if name == OTA_MANIFEST));
    }

    #[test]
    fn test_overlong_version_name() {
        let long = FirmwareVersion::new("x".repeat(33), "board", 1);
        let mut builder = Ota::new(long).builder();
        builder.add(EntryInput::new(OTA_MANIFEST, vec![1])).unwrap();
        assert!(matches!(
            builder.build(),
            Err(Error::FieldTooLong { max: 32, .. })
        ));
    }

    #[test]
    fn test_verify_detects_data_corruption() {
        let mut image = sample_image(Ota::new(version(1)));
        let last = image.len() - 1;
        image[last] ^= 1;
        let reader = OtaReader::parse(&image).unwrap();
        assert!(matches!(
            reader.verify(),
            Err(Error::ChecksumMismatch { what, .. }) if what == "OTA data"
        ));
    }

    #[test]
    fn test_verify_detects_directory_corruption() {
        let mut image = sample_image(Ota::new(version(1)));
        image[0x200 + 24] ^= 1;
        assert!(matches!(
            Ota::verify_header(&image),
            Err(Error::ChecksumMismatch { what, .. }) if what == "OTA header"
        ));
    }

    #[test]
    fn test_reader_honours_dir_offset() {
        let image = sample_image(Ota::new(version(1)));
        let mut moved = image.clone();
        moved.copy_within(0x200..0x240, 0x100);
        moved[0x200..0x240].fill(0);
        LittleEndian::write_u16(&mut moved[16..], 0x100);
        let reader = OtaReader::parse(&moved).unwrap();
        assert_eq!(reader.entries().len(), 2);
        assert_eq!(reader.entries()[1].name, OTA_MANIFEST);
    }

    #[test]
    fn test_bad_magic() {
        let mut image = sample_image(Ota::new(version(1)));
        image[..4].copy_from_slice(b"ACTT");
        assert!(matches!(
            OtaReader::parse(&image),
            Err(Error::BadMagic { .. })
        ));
        assert!(OtaHeader::parse(&image).is_err());
    }
}
