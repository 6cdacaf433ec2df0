//! Generic directory container reader.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::container::{ContainerEntry, ContainerFormat, DIR_ENTRY_SIZE, validate_name};
use crate::error::{Error, Result};

/// Parsed view over a container image of format `F`.
///
/// Parsing validates the magic and the entry count; per-entry checksums are
/// only checked by [`ContainerReader::verify`], with the algorithm of the
/// format the reader was created with.
#[derive(Debug)]
pub struct ContainerReader<'a, F: ContainerFormat> {
    format: F,
    image: &'a [u8],
    entries: Vec<ContainerEntry>,
}

impl<'a, F: ContainerFormat + Default> ContainerReader<'a, F> {
    /// Parses `image` with the default settings of the format.
    ///
    /// # Errors
    ///
    /// See [`ContainerReader::parse_with`].
    pub fn parse(image: &'a [u8]) -> Result<Self> {
        Self::parse_with(F::default(), image)
    }
}

impl<'a, F: ContainerFormat> ContainerReader<'a, F> {
    /// Parses the header and directory of `image`.
    ///
    /// # Errors
    ///
    /// [`Error::BadMagic`] when the magic does not match,
    /// [`Error::TooManyEntries`] when the count exceeds the format maximum and
    /// [`Error::Truncated`] when the header or directory is cut short.
    pub fn parse_with(format: F, image: &'a [u8]) -> Result<Self> {
        let magic_len = F::MAGIC.len();
        if image.len() < magic_len || &image[..magic_len] != F::MAGIC {
            return Err(Error::BadMagic {
                expected: F::MAGIC.to_vec(),
                found: image[..magic_len.min(image.len())].to_vec(),
            });
        }

        if image.len() < F::HEADER_LEN {
            return Err(Error::Truncated {
                what: "container header",
                need: F::HEADER_LEN,
                have: image.len(),
            });
        }

        let count = F::read_count(image);
        if count > F::MAX_ENTRIES {
            return Err(Error::TooManyEntries {
                count,
                max: F::MAX_ENTRIES,
            });
        }

        let dir_offset = F::dir_offset(image);
        let dir_end = dir_offset + count * DIR_ENTRY_SIZE;
        if image.len() < dir_end {
            return Err(Error::Truncated {
                what: "container directory",
                need: dir_end,
                have: image.len(),
            });
        }

        let entries = image[dir_offset..dir_end]
            .chunks_exact(DIR_ENTRY_SIZE)
            .map(F::decode_entry)
            .filter(|entry| !entry.is_unused())
            .collect();

        Ok(Self {
            format,
            image,
            entries,
        })
    }

    /// The raw image.
    pub fn image(&self) -> &'a [u8] {
        self.image
    }

    /// Used directory entries in directory order.
    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    /// Looks up an entry by name.
    pub fn entry(&self, name: &str) -> Option<&ContainerEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Returns the unpadded content of `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] when the entry points past the end of the
    /// image.
    pub fn data(&self, entry: &ContainerEntry) -> Result<&'a [u8]> {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        self.image.get(start..end).ok_or(Error::Truncated {
            what: "container entry",
            need: end,
            have: self.image.len(),
        })
    }

    /// Returns every used entry together with its content.
    pub fn files(&self) -> Result<Vec<(&ContainerEntry, &'a [u8])>> {
        self.entries
            .iter()
            .map(|entry| Ok((entry, self.data(entry)?)))
            .collect()
    }

    /// Writes every used entry to `out_dir`, creating it if needed.
    ///
    /// Returns the paths written, in directory order.
    pub fn extract_to(&self, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        info!(
            "{}: extract {} files to {}",
            F::NAME,
            self.entries.len(),
            out_dir.display()
        );
        fs::create_dir_all(out_dir)?;

        let mut written = Vec::with_capacity(self.entries.len());
        for (entry, data) in self.files()? {
            validate_name(&entry.name)?;
            let path = out_dir.join(&entry.name);
            info!(
                "{}: extract file {}, length {:#x}",
                F::NAME,
                path.display(),
                entry.length
            );
            fs::write(&path, data)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Checks the header checksums and the checksum of every entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChecksumMismatch`] for the first mismatch found.
    pub fn verify(&self) -> Result<()> {
        F::verify_header(self.image)?;
        for (entry, data) in self.files()? {
            let computed = self.format.entry_checksum(data)?;
            if computed != entry.checksum {
                return Err(Error::checksum_mismatch(
                    format!("entry `{}`", entry.name),
                    entry.checksum,
                    computed,
                ));
            }
        }
        Ok(())
    }
}
