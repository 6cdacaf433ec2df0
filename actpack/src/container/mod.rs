//! Directory style firmware containers.
//!
//! ATF and OTA images share one layout scheme: a header, a directory of
//! 32-byte entries and a data region where every file starts on a 512-byte
//! boundary. The differences (magic, header fields, where the header checksum
//! lives, entry field order) are captured by the [`ContainerFormat`] trait and
//! implemented by [`Atf`] and [`Ota`].
//!
//! ```text
//! +---------------------------+ 0
//! | header                    |
//! | directory (32B entries)   |
//! +---------------------------+ data_start (512 aligned)
//! | file 0 | pad to 512       |
//! | file 1 | pad to 512       |
//! | ...                       |
//! +---------------------------+
//! ```

use std::path::Path;

use crate::checksum::crc32;
use crate::error::{Error, Result};

pub mod atf;
pub mod builder;
pub mod ota;
pub mod reader;

pub use atf::{Atf, AtfBuilder, AtfReader, EntryChecksum};
pub use builder::{DirectoryBuilder, EntryInput};
pub use ota::{OTA_MANIFEST, Ota, OtaBuilder, OtaHeader, OtaReader};
pub use reader::ContainerReader;

/// Longest entry name the directory can hold ("8.3" file names).
pub const MAX_NAME_LEN: usize = 12;

/// Size of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 32;

/// One directory slot of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerEntry {
    /// File name, at most [`MAX_NAME_LEN`] bytes.
    pub name: String,
    /// Absolute byte offset of the file inside the container.
    pub offset: u32,
    /// Unpadded file length.
    pub length: u32,
    /// Checksum of the unpadded content.
    pub checksum: u32,
    /// Load address (ATF only).
    pub load_addr: u32,
    /// Run address (ATF only).
    pub run_addr: u32,
}

impl ContainerEntry {
    /// Whether the slot is unused and must be skipped on extraction.
    pub fn is_unused(&self) -> bool {
        self.offset == 0 || self.length == 0 || self.name.is_empty()
    }
}

/// Layout rules of one container format.
///
/// Associated functions describe the on-disk layout and are used by both
/// [`DirectoryBuilder`] and [`ContainerReader`]; the `&self` methods carry
/// build-time parameters such as version blocks or time stamps.
pub trait ContainerFormat {
    /// Short format name used in log messages.
    const NAME: &'static str;
    /// Magic bytes at offset 0.
    const MAGIC: &'static [u8];
    /// Fixed header length preceding the fields read by [`Self::read_count`].
    const HEADER_LEN: usize;
    /// Maximum number of directory entries.
    const MAX_ENTRIES: usize;
    /// Offset of the first directory entry written by the builder.
    const DIR_OFFSET: usize;
    /// Filler used to pad every file to the sector size.
    const DATA_FILL: u8;

    /// Offset of the first data byte for a container with `count` entries.
    fn data_start(count: usize) -> usize;

    /// Reads the entry count from a header of at least [`Self::HEADER_LEN`] bytes.
    fn read_count(header: &[u8]) -> usize;

    /// Reads the directory offset from the header.
    fn dir_offset(_header: &[u8]) -> usize {
        Self::DIR_OFFSET
    }

    /// Serializes `entry` into a [`DIR_ENTRY_SIZE`] slot.
    fn encode_entry(entry: &ContainerEntry, slot: &mut [u8]);

    /// Parses a [`DIR_ENTRY_SIZE`] slot.
    fn decode_entry(slot: &[u8]) -> ContainerEntry;

    /// Checks the header level checksums of a complete image.
    fn verify_header(image: &[u8]) -> Result<()>;

    /// Validates the whole input set before anything is laid out.
    fn validate(&self, _names: &[&str]) -> Result<()> {
        Ok(())
    }

    /// Computes the directory checksum of one file.
    fn entry_checksum(&self, data: &[u8]) -> Result<u32> {
        Ok(crc32(data))
    }

    /// Fills the header fields and patches in the header checksum.
    ///
    /// `image` already holds the directory and the padded data region.
    fn finish(&self, image: &mut [u8], count: usize) -> Result<()>;
}

/// Checks that `name` can be stored in a directory slot.
///
/// # Errors
///
/// [`Error::NameTooLong`] for names over [`MAX_NAME_LEN`] bytes and
/// [`Error::InvalidName`] for empty, non-ASCII or path-like names.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || !name.is_ascii()
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::name_too_long(name, MAX_NAME_LEN));
    }
    Ok(())
}

/// Returns the file name component of `path` as an entry name.
pub fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidName(path.display().to_string()))
}

pub(crate) fn write_name(slot: &mut [u8], name: &str) {
    let field = &mut slot[..MAX_NAME_LEN];
    field.fill(0);
    field[..name.len()].copy_from_slice(name.as_bytes());
}

pub(crate) fn read_name(field: &[u8]) -> String {
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
