//! Whole firmware pipeline driven by `firmware.toml`.
//!
//! Directory layout next to the description:
//!
//! ```text
//! bin/        partition files (inputs, rewritten with CRC / encryption)
//! bin_orig/   copy of bin/ taken before CRC and encryption
//! ota/        staged OTA files and the generated ota.xml
//! ota_orig/   same, staged from bin_orig/
//! raw.bin     raw flash image
//! ota.bin     OTA image, ota.bin.orig without CRC / encryption
//! ```

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use actpack::{
    FirmwareVersion, OTA_MANIFEST, Ota, PartitionType, RawImageBuilder, SequenceVariant,
    ToolRunner,
    checksum::{DEFAULT_CRC_CHUNK, add_chunk_crc, crc32},
    ota::manifest::{escape, version_element},
    tool::run_checked,
    version::param_block,
};
use anyhow::Context;

use crate::config::{FirmwareConfig, PartitionConfig};
use crate::utils::{copy_dir, list_files, replace_placeholders};

/// One partition entry of `ota.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPartition {
    pub part_type: PartitionType,
    pub name: String,
    pub file_id: u64,
    pub file_name: String,
    pub file_size: u64,
    pub checksum: u32,
}

/// Renders the `ota.xml` manifest read by the update client.
pub fn ota_manifest(version: &FirmwareVersion, parts: &[ManifestPartition]) -> String {
    let mut xml = String::from("<?xml version='1.0' encoding='UTF-8'?>\n<ota_firmware>\n");
    xml.push_str(&version_element("firmware_version", version));
    xml.push_str("\t<partitions>\n");
    xml.push_str(&format!("\t\t<partitionsNum>{}</partitionsNum>\n", parts.len()));
    for part in parts {
        xml.push_str(&format!(
            "\t\t<partition>\n\
             \t\t\t<type>{}</type>\n\
             \t\t\t<name>{}</name>\n\
             \t\t\t<file_id>{}</file_id>\n\
             \t\t\t<file_name>{}</file_name>\n\
             \t\t\t<file_size>{:#x}</file_size>\n\
             \t\t\t<checksum>{:#x}</checksum>\n\
             \t\t</partition>\n",
            part.part_type,
            escape(&part.name),
            part.file_id,
            escape(&part.file_name),
            part.file_size,
            part.checksum,
        ));
    }
    xml.push_str("\t</partitions>\n</ota_firmware>\n");
    xml
}

/// Paths produced by [`FirmwareBuilder::build`].
#[derive(Debug, Clone)]
pub struct FirmwareOutputs {
    pub param: Option<PathBuf>,
    pub raw: PathBuf,
    pub ota: PathBuf,
    pub ota_orig: PathBuf,
}

/// Runs the firmware pipeline for one description.
pub struct FirmwareBuilder<'a> {
    config: FirmwareConfig,
    fw_dir: PathBuf,
    build_time: String,
    board: Option<String>,
    runner: &'a dyn ToolRunner,
}

impl<'a> FirmwareBuilder<'a> {
    /// `fw_dir` is the directory holding `bin/`.
    pub fn new(config: FirmwareConfig, fw_dir: impl Into<PathBuf>, runner: &'a dyn ToolRunner) -> Self {
        Self {
            config,
            fw_dir: fw_dir.into(),
            build_time: chrono::Local::now().format("%y%m%d%H%M").to_string(),
            board: None,
            runner,
        }
    }

    /// Overrides the `yymmddHHMM` build time stamp.
    pub fn with_build_time(mut self, stamp: impl Into<String>) -> Self {
        self.build_time = stamp.into();
        self
    }

    /// Overrides the board name of the description.
    pub fn with_board(mut self, board: Option<String>) -> Self {
        self.board = board;
        self
    }

    fn bin_dir(&self) -> PathBuf {
        self.fw_dir.join("bin")
    }

    fn orig_bin_dir(&self) -> PathBuf {
        self.fw_dir.join("bin_orig")
    }

    fn part_file(&self, part: &PartitionConfig) -> Option<PathBuf> {
        part.file_name.as_ref().map(|name| self.bin_dir().join(name))
    }

    pub fn build(mut self) -> anyhow::Result<FirmwareOutputs> {
        info!("FW: build time {}", self.build_time);
        self.drop_missing_partitions()?;
        let version = self.config.version(&self.build_time, self.board.as_deref())?;
        info!(
            "FW: version {} ({:#x}), board {}",
            version.version_name, version.version_code, version.board_name
        );

        let param = self.write_param_file(&version)?;
        copy_dir(&self.bin_dir(), &self.orig_bin_dir())
            .with_context(|| format!("can not copy {}", self.bin_dir().display()))?;
        self.add_crc()?;
        self.encrypt_files()?;
        self.check_file_sizes()?;
        let raw = self.build_raw()?;

        let (ota, manifest) = self.build_ota(&self.bin_dir(), "ota", "ota.bin", &version, None)?;
        let (ota_orig, _) = self.build_ota(
            &self.orig_bin_dir(),
            "ota_orig",
            "ota.bin.orig",
            &version,
            Some(&manifest),
        )?;

        Ok(FirmwareOutputs {
            param,
            raw,
            ota,
            ota_orig,
        })
    }

    fn drop_missing_partitions(&mut self) -> anyhow::Result<()> {
        let bin_dir = self.bin_dir();
        self.config.partitions.retain(|part| {
            let Some(name) = &part.file_name else {
                return true;
            };
            let path = bin_dir.join(name);
            if part.part_type != PartitionType::SysParam && !path.is_file() {
                warn!("partition {} ignored: cannot find {}", part.name, path.display());
                return false;
            }
            true
        });
        if self.config.partitions.is_empty() {
            bail!("no partition left to build");
        }
        Ok(())
    }

    fn write_param_file(&self, version: &FirmwareVersion) -> anyhow::Result<Option<PathBuf>> {
        let table = self.config.partition_table()?.encode()?;
        let Some(file) = self.config.param_partition().and_then(|p| self.part_file(p)) else {
            warn!("FW: no SYS_PARAM partition file, partition table not written");
            return Ok(None);
        };

        let sys_code = self
            .config
            .firmware_version
            .sys_version_code
            .to_u32("sys_version_code")?;
        let record = version.to_record(sys_code)?;
        fs::create_dir_all(self.bin_dir())?;
        fs::write(&file, param_block(&table, &record))
            .with_context(|| format!("can not write {}", file.display()))?;
        info!("FW: partition table and version written to {}", file.display());
        Ok(Some(file))
    }

    /// Unique file names of the partitions selected by `pred`, in order.
    fn files_where(&self, pred: impl Fn(&PartitionConfig) -> bool) -> Vec<&PartitionConfig> {
        let mut seen: Vec<&str> = Vec::new();
        let mut parts = Vec::new();
        for part in &self.config.partitions {
            let Some(name) = part.file_name.as_deref() else {
                continue;
            };
            if pred(part) && !seen.contains(&name) {
                seen.push(name);
                parts.push(part);
            }
        }
        parts
    }

    fn add_crc(&self) -> anyhow::Result<()> {
        for part in self.files_where(|p| p.enable_crc) {
            let Some(path) = self.part_file(part) else {
                continue;
            };
            let data = fs::read(&path).with_context(|| format!("can not read {}", path.display()))?;
            fs::write(&path, add_chunk_crc(&data, DEFAULT_CRC_CHUNK))?;
            info!("FW: add crc to {}", path.display());
        }
        Ok(())
    }

    fn encrypt_files(&self) -> anyhow::Result<()> {
        let parts = self.files_where(|p| p.enable_encryption);
        let Some(tool) = &self.config.tools.encrypt else {
            if self.config.encryption_required {
                bail!("firmware encryption is required but no encrypt tool is configured");
            }
            for part in parts {
                warn!("partition {}: encryption enabled but no encrypt tool configured", part.name);
            }
            return Ok(());
        };

        let template: Vec<String> = if self.config.tools.encrypt_args.is_empty() {
            vec!["${block_size}".into(), "${file}".into()]
        } else {
            self.config.tools.encrypt_args.clone()
        };

        for part in parts {
            let Some(path) = self.part_file(part) else {
                continue;
            };
            let block_size = if part.enable_crc {
                DEFAULT_CRC_CHUNK + 2
            } else {
                DEFAULT_CRC_CHUNK
            };
            let file = path.display().to_string();
            let block_size = block_size.to_string();
            let vars = [("file", file.as_str()), ("block_size", block_size.as_str())];
            let args: Vec<OsString> = template
                .iter()
                .map(|arg| replace_placeholders(arg, &vars).into())
                .collect();

            info!("FW: encrypt file '{}'", part.file_name.as_deref().unwrap_or_default());
            run_checked(self.runner, tool, &args)?;
        }
        Ok(())
    }

    fn check_file_sizes(&self) -> anyhow::Result<()> {
        for part in &self.config.partitions {
            let Some(path) = self.part_file(part) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            let size = fs::metadata(&path)?.len();
            part.to_entry()?.check_file_fits(size)?;
        }
        Ok(())
    }

    fn build_raw(&self) -> anyhow::Result<PathBuf> {
        info!("FW: build raw image");
        let mut raw = RawImageBuilder::new(self.config.disk_size()?);
        for part in &self.config.partitions {
            if !part.enable_raw {
                continue;
            }
            if let Some(path) = self.part_file(part) {
                raw.place_file(&path, part.address.to_u32("address")?)?;
            }
        }
        let out = self.fw_dir.join("raw.bin");
        raw.write_to(&out)?;
        Ok(out)
    }

    fn build_ota(
        &self,
        src_dir: &Path,
        stage: &str,
        out_name: &str,
        version: &FirmwareVersion,
        manifest: Option<&str>,
    ) -> anyhow::Result<(PathBuf, String)> {
        info!("FW: build OTA image '{out_name}'");
        let stage_dir = self.fw_dir.join(stage);
        if stage_dir.exists() {
            fs::remove_dir_all(&stage_dir)?;
        }
        fs::create_dir_all(&stage_dir)?;

        let mut entries = Vec::new();
        for part in self.files_where(|p| p.enable_ota) {
            let Some(file_name) = part.ota_file() else {
                continue;
            };
            let src = src_dir.join(file_name);
            let dst = stage_dir.join(file_name);
            fs::copy(&src, &dst).with_context(|| format!("can not copy {}", src.display()))?;
            let data = fs::read(&dst)?;
            entries.push(ManifestPartition {
                part_type: part.part_type,
                name: part.name.clone(),
                file_id: part.file_id.0,
                file_name: file_name.to_string(),
                file_size: data.len() as u64,
                checksum: crc32(&data),
            });
        }

        let manifest = match manifest {
            Some(text) => text.to_string(),
            None => ota_manifest(version, &entries),
        };
        fs::write(stage_dir.join(OTA_MANIFEST), &manifest)?;

        let mut files = list_files(&stage_dir)?;
        self.config.sequencer(SequenceVariant::Full).sort(&mut files);

        let mut builder = Ota::new(version.clone()).builder();
        for file in &files {
            builder.add_file(file)?;
        }
        let out = self.fw_dir.join(out_name);
        builder
            .write_to(&out)
            .with_context(|| format!("failed to generate OTA image {}", out.display()))?;
        Ok((out, manifest))
    }
}
