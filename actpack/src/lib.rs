//! # actpack - Actions firmware container library
//!
//! Builds and reads the binary containers used by Actions SoC firmware.
//!
//! ## Features
//!
//! - ATF test images and OTA update images (directory containers)
//! - Partition table and firmware version record for the SYS_PARAM file
//! - NVRAM property regions built from `key=value` files
//! - OTA install ordering and patch images built with an external diff tool
//! - Raw flash images
//! - CRC32, CRC16 chunk trailers, CRC-8/MAXIM and word sums
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use actpack::{Atf, AtfReader, EntryInput};
//!
//! let mut builder = Atf::new().builder();
//! builder.add(EntryInput::new("boot.bin", vec![0u8; 600]))?;
//! let image = builder.build()?;
//!
//! let reader = AtfReader::parse(&image)?;
//! reader.verify()?;
//! reader.extract_to("out")?;
//! # Ok::<(), actpack::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`align`] - Alignment helpers
//! - [`checksum`] - Checksum engine
//! - [`container`] - ATF and OTA directory containers
//! - [`partition`] - Partition table
//! - [`version`] - Firmware version records
//! - [`nvram`] - NVRAM property regions
//! - [`ota`] - OTA file ordering and patch images
//! - [`raw`] - Raw flash images
//! - [`tool`] - External tool seam
//! - [`error`] - Error types and result definitions

#[macro_use]
extern crate log;

pub mod align;

/// Checksums shared by every container format.
pub mod checksum;

/// ATF and OTA directory containers.
pub mod container;

pub mod error;
pub mod nvram;
pub mod ota;

/// Partition table stored in the SYS_PARAM file.
pub mod partition;

pub mod raw;
pub mod tool;
pub mod version;

pub use container::{
    Atf, AtfBuilder, AtfReader, ContainerEntry, ContainerFormat, ContainerReader,
    DirectoryBuilder, EntryChecksum, EntryInput, OTA_MANIFEST, Ota, OtaBuilder, OtaHeader,
    OtaReader,
};
pub use error::{Error, ErrorKind, Result};
pub use nvram::{NvramRegionBuilder, Properties};
pub use ota::{OtaPatchBuilder, OtaSequencer, SequencePartition, SequenceVariant};
pub use partition::{PartitionEntry, PartitionFlags, PartitionTable, PartitionType};
pub use raw::RawImageBuilder;
pub use tool::{ToolOutput, ToolRunner};
pub use version::FirmwareVersion;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
