//! Error types and result definitions.
//!
//! Every fallible operation in this crate returns [`Result`]. Errors are
//! grouped by [`ErrorKind`] so callers can tell a broken input set apart
//! from a missing file or a failing external tool.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input violates one of the container format rules.
    FormatViolation,
    /// A required input file does not exist.
    InputMissing,
    /// A delegated external tool exited unsuccessfully.
    ExternalToolFailure,
    /// Filesystem or stream I/O failed.
    Io,
}

/// Errors produced while building or reading firmware containers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("name `{name}` is {len} bytes long, the limit is {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("invalid entry name `{0}`")]
    InvalidName(String),

    #[error("entry `{0}` is empty")]
    EmptyEntry(String),

    #[error("{count} entries given, the format holds at most {max}")]
    TooManyEntries { count: usize, max: usize },

    #[error("bad magic: expected {expected:02x?}, found {found:02x?}")]
    BadMagic { expected: Vec<u8>, found: Vec<u8> },

    #[error("{what} is truncated: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("{what} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        what: String,
        stored: u32,
        computed: u32,
    },

    #[error("{field} is {len} bytes long, the limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("partition {name}: {what} {value:#x} is not aligned to {align:#x}")]
    Unaligned {
        name: String,
        what: &'static str,
        value: u32,
        align: u32,
    },

    #[error("partition {name}: file_address {file_address:#x} is not inside [{address:#x}, {end:#x})")]
    FileAddressOutOfRange {
        name: String,
        file_address: u32,
        address: u32,
        end: u64,
    },

    #[error("unknown partition type `{0}`")]
    UnknownPartitionType(String),

    #[error("partition {name}: {what} {value} does not fit in 4 bits")]
    IdOutOfRange {
        name: String,
        what: &'static str,
        value: u8,
    },

    #[error("partition {0}: BOOT/SYSTEM/RECOVERY/SYS_PARAM partitions must enable encryption")]
    EncryptionRequired(String),

    #[error("`{name}` is {size:#x} bytes, at most {max:#x} bytes fit")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("required file `{0}` is missing from the input set")]
    MissingRequiredFile(String),

    #[error("new firmware version code {new:#x} must be larger than the old one {old:#x}")]
    VersionNotNewer { old: u32, new: u32 },

    #[error("OTA image `{}` carries no firmware version block", .0.display())]
    MissingVersion(PathBuf),

    #[error("ota.xml: {0}")]
    InvalidManifest(String),

    #[error("buffer length {len} is not a multiple of {unit}")]
    UnalignedBuffer { len: usize, unit: usize },

    #[error("input `{}` does not exist", .0.display())]
    InputMissing(PathBuf),

    #[error("`{}` failed with {}:\n{output}", .tool.display(), exit_status(.code))]
    ExternalTool {
        tool: PathBuf,
        code: Option<i32>,
        output: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

impl Error {
    /// Creates a [`Error::NameTooLong`] error.
    pub fn name_too_long(name: impl Into<String>, max: usize) -> Self {
        let name = name.into();
        Self::NameTooLong {
            len: name.len(),
            name,
            max,
        }
    }

    /// Creates a [`Error::ChecksumMismatch`] error.
    pub fn checksum_mismatch(what: impl Into<String>, stored: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            what: what.into(),
            stored,
            computed,
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputMissing(_) => ErrorKind::InputMissing,
            Self::ExternalTool { .. } => ErrorKind::ExternalToolFailure,
            Self::Io(_) => ErrorKind::Io,
            _ => ErrorKind::FormatViolation,
        }
    }
}
