//! Firmware description (`firmware.toml`).
//!
//! # Configuration File Format
//!
//! ```toml
//! disk_size = "0x400000"
//! encryption_required = false
//!
//! [firmware_version]
//! version_name = "1.0.0_$(build_time)"
//! version_code = "0x100"
//! board_name = "ats2853"
//!
//! [tools]
//! encrypt = "tools/fw2x"
//! encrypt_args = ["Encrypt", "${block_size}", "${file}", "${file}"]
//!
//! [[partitions]]
//! name = "boot"
//! type = "BOOT"
//! file_name = "mbrec.bin"
//! address = "0x0"
//! size = "0x10000"
//! enable_crc = true
//! enable_ota = true
//! ```
//!
//! Numeric fields accept integers, `"0x..."` strings or sizes such as
//! `"4 MiB"`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use actpack::{
    FirmwareVersion, OtaSequencer, PartitionEntry, PartitionFlags, PartitionTable,
    PartitionType, SequencePartition, SequenceVariant, raw::DEFAULT_DISK_SIZE,
};
use anyhow::Context;
use serde::Deserialize;

/// Placeholder replaced by the build time stamp in `version_name`.
pub const BUILD_TIME_PLACEHOLDER: &str = "$(build_time)";

/// A number written as an integer or a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "NumberRepr")]
pub struct Number(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(u64),
    Str(String),
}

impl TryFrom<NumberRepr> for Number {
    type Error = String;

    fn try_from(repr: NumberRepr) -> Result<Self, Self::Error> {
        match repr {
            NumberRepr::Int(n) => Ok(Number(n)),
            NumberRepr::Str(s) => parse_number(&s).map(Number),
        }
    }
}

/// Parses `"0x1000"`, `"4096"` or `"4 KiB"`.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|e| format!("invalid number `{s}`: {e}"));
    }
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    byte_unit::Byte::parse_str(s, true)
        .map(|b| b.as_u64())
        .map_err(|e| format!("invalid number `{s}`: {e}"))
}

impl Number {
    pub fn to_u32(self, what: &str) -> anyhow::Result<u32> {
        u32::try_from(self.0).with_context(|| format!("{what} {:#x} does not fit in 32 bits", self.0))
    }

    pub fn to_u8(self, what: &str) -> anyhow::Result<u8> {
        u8::try_from(self.0).with_context(|| format!("{what} {:#x} does not fit in 8 bits", self.0))
    }
}

fn default_disk_size() -> Number {
    Number(DEFAULT_DISK_SIZE as u64)
}

/// Root of `firmware.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareConfig {
    /// Size of the raw flash image.
    #[serde(default = "default_disk_size")]
    pub disk_size: Number,
    /// BOOT/SYSTEM/RECOVERY/SYS_PARAM partitions must enable encryption.
    #[serde(default)]
    pub encryption_required: bool,
    pub firmware_version: VersionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub partitions: Vec<PartitionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    pub version_name: String,
    #[serde(default)]
    pub version_code: Number,
    #[serde(default)]
    pub sys_version_code: Number,
    #[serde(default)]
    pub board_name: String,
}

/// External programs used by the firmware pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    /// Binary diff program, called as `diff OLD NEW PATCH`.
    pub diff: Option<PathBuf>,
    /// Encryption program.
    pub encrypt: Option<PathBuf>,
    /// Encryption arguments; `${file}` and `${block_size}` are substituted.
    #[serde(default)]
    pub encrypt_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub part_type: PartitionType,
    #[serde(default)]
    pub file_id: Number,
    pub mirror_id: Option<Number>,
    pub storage_id: Option<Number>,
    pub file_name: Option<String>,
    pub address: Number,
    pub size: Number,
    /// Defaults to `address`.
    pub file_address: Option<Number>,
    #[serde(default)]
    pub enable_crc: bool,
    #[serde(default)]
    pub enable_encryption: bool,
    #[serde(default)]
    pub enable_boot_check: bool,
    #[serde(default)]
    pub enable_ota: bool,
    #[serde(default)]
    pub enable_raw: bool,
}

impl PartitionConfig {
    /// Converts to a partition table entry.
    pub fn to_entry(&self) -> anyhow::Result<PartitionEntry> {
        let what = |field: &str| format!("partition {}: {field}", self.name);
        let address = self.address.to_u32(&what("address"))?;

        let mut flags = PartitionFlags::empty();
        flags.set(PartitionFlags::CRC, self.enable_crc);
        flags.set(PartitionFlags::ENCRYPTION, self.enable_encryption);
        flags.set(PartitionFlags::BOOT_CHECK, self.enable_boot_check);

        let mut entry = PartitionEntry::new(
            &self.name,
            self.part_type,
            address,
            self.size.to_u32(&what("size"))?,
        )
        .with_file_id(self.file_id.to_u8(&what("file_id"))?)
        .with_flags(flags);
        if let Some(file_address) = self.file_address {
            entry = entry.with_file_address(file_address.to_u32(&what("file_address"))?);
        }
        if let Some(mirror_id) = self.mirror_id {
            entry = entry.with_mirror_id(mirror_id.to_u8(&what("mirror_id"))?);
        }
        if let Some(storage_id) = self.storage_id {
            entry = entry.with_storage_id(storage_id.to_u8(&what("storage_id"))?);
        }
        Ok(entry)
    }

    /// Whether this partition's file is shipped in OTA images.
    pub fn ota_file(&self) -> Option<&str> {
        self.file_name.as_deref().filter(|_| self.enable_ota)
    }
}

impl FirmwareConfig {
    /// Reads and parses a firmware description.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("can not open config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.partitions.is_empty() {
            bail!("no partition configured");
        }
        Ok(config)
    }

    pub fn disk_size(&self) -> anyhow::Result<usize> {
        usize::try_from(self.disk_size.0).context("disk_size is too large")
    }

    /// Builds the partition table.
    pub fn partition_table(&self) -> anyhow::Result<PartitionTable> {
        let mut table = PartitionTable::new().with_encryption_required(self.encryption_required);
        for part in &self.partitions {
            table.push(part.to_entry()?)?;
        }
        Ok(table)
    }

    /// Firmware version with `$(build_time)` replaced by `build_time`.
    ///
    /// `board` overrides the configured board name.
    pub fn version(&self, build_time: &str, board: Option<&str>) -> anyhow::Result<FirmwareVersion> {
        let cfg = &self.firmware_version;
        Ok(FirmwareVersion::new(
            cfg.version_name.replace(BUILD_TIME_PLACEHOLDER, build_time),
            board.unwrap_or(&cfg.board_name),
            cfg.version_code.to_u32("version_code")?,
        ))
    }

    /// OTA file ordering for this partition layout.
    pub fn sequencer(&self, variant: SequenceVariant) -> OtaSequencer {
        let partitions = self
            .partitions
            .iter()
            .map(|p| SequencePartition::new(p.part_type, p.file_name.as_deref(), p.enable_ota))
            .collect();
        OtaSequencer::new(partitions, variant)
    }

    /// The SYS_PARAM partition, if it has a file.
    pub fn param_partition(&self) -> Option<&PartitionConfig> {
        self.partitions
            .iter()
            .rfind(|p| p.part_type == PartitionType::SysParam && p.file_name.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
disk_size = "4 MiB"
encryption_required = false

[firmware_version]
version_name = "1.0.0_$(build_time)"
version_code = "0x100"
board_name = "ats2853"

[tools]
encrypt = "fw2x"
encrypt_args = ["${block_size}", "${file}"]

[[partitions]]
name = "boot"
type = "BOOT"
file_id = 1
file_name = "mbrec.bin"
address = "0x0"
size = "0x10000"
enable_crc = true
enable_ota = true

[[partitions]]
name = "param"
type = "SYS_PARAM"
file_id = 2
mirror_id = 1
file_name = "param.bin"
address = 0x10000
size = 4096
file_address = "0x10000"
enable_ota = true
"#;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_number("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_number(" 4096 ").unwrap(), 4096);
        assert_eq!(parse_number("4 MiB").unwrap(), 0x400000);
        assert!(parse_number("0xzz").is_err());
        assert!(parse_number("lots").is_err());
    }

    #[test]
    fn test_parse_config() {
        let config = FirmwareConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.disk_size().unwrap(), 0x400000);
        assert_eq!(config.tools.encrypt.as_deref(), Some(Path::new("fw2x")));
        assert_eq!(config.partitions.len(), 2);

        let boot = config.partitions[0].to_entry().unwrap();
        assert_eq!(boot.part_type, PartitionType::Boot);
        assert_eq!(boot.file_address, 0);
        assert_eq!(boot.mirror_id, 0xf);
        assert!(boot.flags.contains(PartitionFlags::CRC));

        let param = config.partitions[1].to_entry().unwrap();
        assert_eq!(param.size, 0x1000);
        assert_eq!(param.mirror_id, 1);
        assert_eq!(config.param_partition().unwrap().name, "param");

        let table = config.partition_table().unwrap();
        assert_eq!(table.entries().len(), 2);
    }

    #[test]
    fn test_version_build_time() {
        let config = FirmwareConfig::parse(SAMPLE).unwrap();
        let version = config.version("2410161230", None).unwrap();
        assert_eq!(version.version_name, "1.0.0_2410161230");
        assert_eq!(version.version_code, 0x100);
        assert_eq!(version.board_name, "ats2853");
        assert_eq!(config.version("x", Some("evb")).unwrap().board_name, "evb");
    }

    #[test]
    fn test_sequencer_from_config() {
        let config = FirmwareConfig::parse(SAMPLE).unwrap();
        let seq = config.sequencer(SequenceVariant::Full);
        assert_eq!(seq.key("mbrec.bin"), actpack::ota::BOOT_SEQUENCE);
        assert_eq!(seq.key("param.bin"), actpack::ota::SYS_PARAM_SEQUENCE);
    }

    #[test]
    fn test_rejects_unknown_type() {
        let bad = SAMPLE.replace("\"SYS_PARAM\"", "\"FLASH\"");
        let err = FirmwareConfig::parse(&bad).unwrap_err();
        assert!(format!("{err:#}").contains("FLASH"));
    }
}
