//! Generic directory container builder.

use std::{fs, path::Path};

use crate::align::{SECTOR_SIZE, pad_to};
use crate::container::{
    ContainerEntry, ContainerFormat, DIR_ENTRY_SIZE, entry_name, validate_name,
};
use crate::error::{Error, Result};

/// A file queued for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInput {
    /// Directory name of the file.
    pub name: String,
    /// File content.
    pub data: Vec<u8>,
    /// Load address recorded in ATF directories.
    pub load_addr: u32,
    /// Run address recorded in ATF directories.
    pub run_addr: u32,
}

impl EntryInput {
    /// Creates an input from a name and its content.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            load_addr: 0,
            run_addr: 0,
        }
    }

    /// Reads `path` and names the entry after its file name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputMissing`] if `path` is not a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::InputMissing(path.to_path_buf()));
        }
        let name = entry_name(path)?;
        validate_name(&name)?;
        Ok(Self::new(name, fs::read(path)?))
    }

    /// Sets the load address.
    pub fn with_load_address(mut self, addr: u32) -> Self {
        self.load_addr = addr;
        self
    }

    /// Sets the run address.
    pub fn with_run_address(mut self, addr: u32) -> Self {
        self.run_addr = addr;
        self
    }
}

/// Builds one container of format `F`.
///
/// The builder owns every queued file until [`DirectoryBuilder::build`]
/// consumes it. Inputs are validated when they are added, so a rejected name
/// never reaches the output.
#[derive(Debug)]
pub struct DirectoryBuilder<F: ContainerFormat> {
    format: F,
    inputs: Vec<EntryInput>,
}

impl<F: ContainerFormat> DirectoryBuilder<F> {
    /// Creates an empty builder for `format`.
    pub fn new(format: F) -> Self {
        Self {
            format,
            inputs: Vec::new(),
        }
    }

    /// Number of queued files.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether no file has been queued yet.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Queues a file.
    ///
    /// # Errors
    ///
    /// Fails on invalid or overlong names, empty content, or when the
    /// directory is already full.
    pub fn add(&mut self, input: EntryInput) -> Result<&mut Self> {
        validate_name(&input.name)?;
        if input.data.is_empty() {
            return Err(Error::EmptyEntry(input.name));
        }
        if self.inputs.len() >= F::MAX_ENTRIES {
            return Err(Error::TooManyEntries {
                count: self.inputs.len() + 1,
                max: F::MAX_ENTRIES,
            });
        }

        debug!("{}: add `{}`, {} bytes", F::NAME, input.name, input.data.len());
        self.inputs.push(input);
        Ok(self)
    }

    /// Reads `path` and queues it under its file name.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        info!("{}: add file {}", F::NAME, path.display());
        self.add(EntryInput::from_path(path)?)
    }

    /// Lays out the container and returns its bytes.
    ///
    /// # Errors
    ///
    /// Returns the format's validation errors, or [`Error::FileTooLarge`]
    /// when offsets no longer fit the 32-bit directory fields.
    pub fn build(self) -> Result<Vec<u8>> {
        let names: Vec<&str> = self.inputs.iter().map(|i| i.name.as_str()).collect();
        self.format.validate(&names)?;

        let count = self.inputs.len();
        let data_start = F::data_start(count);
        let mut image = vec![0u8; data_start];
        let mut entries = Vec::with_capacity(count);

        for input in &self.inputs {
            let offset = image.len();
            image.extend_from_slice(&input.data);
            pad_to(&mut image, SECTOR_SIZE, F::DATA_FILL);

            let too_large = || Error::FileTooLarge {
                name: input.name.clone(),
                size: input.data.len() as u64,
                max: u32::MAX as u64,
            };
            entries.push(ContainerEntry {
                name: input.name.clone(),
                offset: u32::try_from(offset).map_err(|_| too_large())?,
                length: u32::try_from(input.data.len()).map_err(|_| too_large())?,
                checksum: self.format.entry_checksum(&input.data)?,
                load_addr: input.load_addr,
                run_addr: input.run_addr,
            });
        }

        for (index, entry) in entries.iter().enumerate() {
            debug!(
                "{}: [{index}] {} offset {:#x} length {:#x} checksum {:#010x}",
                F::NAME,
                entry.name,
                entry.offset,
                entry.length,
                entry.checksum
            );
            let start = F::DIR_OFFSET + index * DIR_ENTRY_SIZE;
            F::encode_entry(entry, &mut image[start..start + DIR_ENTRY_SIZE]);
        }

        self.format.finish(&mut image, count)?;
        Ok(image)
    }

    /// Builds the container and writes it to `path`.
    ///
    /// Nothing is written when building fails.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let image = self.build()?;
        fs::write(path, &image)?;
        info!(
            "{}: wrote {} ({} bytes)",
            F::NAME,
            path.display(),
            image.len()
        );
        Ok(image.len())
    }
}
