//! OTA patch images.
//!
//! A patch image carries a binary diff for every file of the new firmware
//! instead of the file itself. Building one runs four stages, each of which
//! aborts the whole build on error:
//!
//! 1. extract the old and new OTA images into the work directory
//! 2. diff every new file against the old file of the same name
//! 3. prepend the old version to the new manifest, and check the version
//!    code increases
//! 4. pack the patches into a new OTA container

use std::{
    ffi::OsString,
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::container::{OTA_MANIFEST, Ota, OtaHeader, OtaReader};
use crate::error::{Error, Result};
use crate::ota::{OtaSequencer, manifest::prepend_old_version};
use crate::tool::{ToolRunner, run_checked};
use crate::version::FirmwareVersion;

/// Stages of a patch build, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Extract,
    Diff,
    RebuildManifest,
    ContainerBuild,
}

impl fmt::Display for PatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extract => "extract",
            Self::Diff => "diff",
            Self::RebuildManifest => "rebuild manifest",
            Self::ContainerBuild => "build container",
        };
        f.write_str(name)
    }
}

/// Builds an OTA patch image from two full OTA images.
pub struct OtaPatchBuilder<'a> {
    runner: &'a dyn ToolRunner,
    diff_tool: PathBuf,
    work_dir: PathBuf,
    sequencer: Option<OtaSequencer>,
}

impl<'a> OtaPatchBuilder<'a> {
    /// `diff_tool` is called as `diff_tool OLD NEW PATCH`.
    pub fn new(
        runner: &'a dyn ToolRunner,
        diff_tool: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            diff_tool: diff_tool.into(),
            work_dir: work_dir.into(),
            sequencer: None,
        }
    }

    /// Re-sorts the patch files instead of keeping the new image's order.
    pub fn with_sequencer(mut self, sequencer: OtaSequencer) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    fn enter(&self, stage: PatchStage) {
        info!("OTA patch: {stage}");
    }

    /// Runs every stage and returns the patch image.
    ///
    /// # Errors
    ///
    /// [`Error::InputMissing`] when an image or an old file is missing,
    /// [`Error::MissingVersion`] when an image has no version block,
    /// [`Error::ExternalTool`] when a diff fails and
    /// [`Error::VersionNotNewer`] when the new version code is not larger
    /// than the old one.
    pub fn build(&self, old_image: &Path, new_image: &Path) -> Result<Vec<u8>> {
        self.enter(PatchStage::Extract);
        let old_data = read_image(old_image)?;
        let new_data = read_image(new_image)?;
        let old_dir = self.work_dir.join("old_ota");
        let new_dir = self.work_dir.join("new_ota");
        let patch_dir = self.work_dir.join("new_ota_patch");

        let old_reader = OtaReader::parse(&old_data)?;
        let new_reader = OtaReader::parse(&new_data)?;
        old_reader.extract_to(&old_dir)?;
        new_reader.extract_to(&new_dir)?;
        fs::create_dir_all(&patch_dir)?;

        self.enter(PatchStage::Diff);
        for entry in new_reader.entries() {
            if entry.name == OTA_MANIFEST {
                continue;
            }
            let old_file = old_dir.join(&entry.name);
            if !old_file.is_file() {
                return Err(Error::InputMissing(old_file));
            }
            let new_file = new_dir.join(&entry.name);
            let patch_file = patch_dir.join(&entry.name);
            info!("OTA patch: diff {}", entry.name);
            let args: Vec<OsString> =
                vec![old_file.into(), new_file.into(), patch_file.clone().into()];
            run_checked(self.runner, &self.diff_tool, &args)?;
            if !patch_file.is_file() {
                return Err(Error::InputMissing(patch_file));
            }
        }

        self.enter(PatchStage::RebuildManifest);
        let old_version = image_version(old_image, &old_data)?;
        let new_version = image_version(new_image, &new_data)?;
        dump_version("old", &old_version);
        dump_version("new", &new_version);
        if old_version.version_code >= new_version.version_code {
            return Err(Error::VersionNotNewer {
                old: old_version.version_code,
                new: new_version.version_code,
            });
        }
        let new_xml = read_manifest(&new_dir)?;
        let old_xml = read_manifest(&old_dir)?;
        let patch_xml = prepend_old_version(&new_xml, &old_xml, &old_version)?;
        fs::write(patch_dir.join(OTA_MANIFEST), patch_xml)?;

        self.enter(PatchStage::ContainerBuild);
        let mut names: Vec<&str> = new_reader
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        if let Some(sequencer) = &self.sequencer {
            sequencer.sort(&mut names);
        }
        let mut builder = Ota::new(new_version).with_old_version(old_version).builder();
        for name in names {
            builder.add_file(patch_dir.join(name))?;
        }
        builder.build()
    }

    /// Builds the patch image and writes it to `out`.
    pub fn write_to(&self, old_image: &Path, new_image: &Path, out: &Path) -> Result<usize> {
        let image = self.build(old_image, new_image)?;
        fs::write(out, &image)?;
        info!("OTA patch: wrote {} ({} bytes)", out.display(), image.len());
        Ok(image.len())
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(Error::InputMissing(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

fn read_manifest(dir: &Path) -> Result<String> {
    let path = dir.join(OTA_MANIFEST);
    if !path.is_file() {
        return Err(Error::InputMissing(path));
    }
    let data = fs::read(&path)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn image_version(path: &Path, image: &[u8]) -> Result<FirmwareVersion> {
    OtaHeader::parse(image)?
        .new_version
        .ok_or_else(|| Error::MissingVersion(path.to_path_buf()))
}

fn dump_version(label: &str, version: &FirmwareVersion) {
    info!(
        "{label} firmware: version name {}, version code {:#x}, board {}",
        version.version_name, version.version_code, version.board_name
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{EntryInput, OtaBuilder};
    use crate::ota::manifest::version_element;
    use crate::ota::{SequencePartition, SequenceVariant};
    use crate::partition::PartitionType;
    use crate::tool::mock::RecordingRunner;

    fn version(code: u32) -> FirmwareVersion {
        FirmwareVersion::new(format!("v{code}"), "board", code)
    }

    fn manifest(code: u32) -> Vec<u8> {
        format!(
            "<ota_firmware>\n{}\t<partitions/>\n</ota_firmware>\n",
            version_element("firmware_version", &version(code))
        )
        .into_bytes()
    }

    fn ota_image_with(version: FirmwareVersion, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder: OtaBuilder = Ota::new(version).builder();
        for (name, data) in files {
            builder.add(EntryInput::new(*name, data.to_vec())).unwrap();
        }
        builder.build().unwrap()
    }

    fn ota_image(code: u32, files: &[(&str, &[u8])]) -> Vec<u8> {
        let xml = manifest(code);
        let files: Vec<(&str, &[u8])> = files
            .iter()
            .map(|&(name, data)| match name {
                OTA_MANIFEST => (name, xml.as_slice()),
                _ => (name, data),
            })
            .collect();
        ota_image_with(version(code), &files)
    }

    struct Fixture {
        dir: tempfile::TempDir,
        old: PathBuf,
        new: PathBuf,
    }

    fn fixture(old_code: u32, new_code: u32, old_files: &[(&str, &[u8])]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.ota");
        let new = dir.path().join("new.ota");
        fs::write(&old, ota_image(old_code, old_files)).unwrap();
        fs::write(
            &new,
            ota_image(
                new_code,
                &[("boot.bin", b"boot-2"), (OTA_MANIFEST, b""), ("app.bin", b"app-2")],
            ),
        )
        .unwrap();
        Fixture { dir, old, new }
    }

    // ota.xml contents are filled in by `ota_image`
    const OLD_FILES: &[(&str, &[u8])] = &[
        ("boot.bin", b"boot-1"),
        (OTA_MANIFEST, b""),
        ("app.bin", b"app-1"),
    ];

    #[test]
    fn test_patch_image() {
        let fx = fixture(1, 2, OLD_FILES);
        let runner = RecordingRunner::default();
        let builder = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"));
        let image = builder.build(&fx.old, &fx.new).unwrap();

        assert_eq!(runner.calls.borrow().len(), 2);

        let header = OtaHeader::parse(&image).unwrap();
        assert_eq!(header.new_version.unwrap().version_code, 2);
        assert_eq!(header.old_version.unwrap().version_code, 1);

        let reader = OtaReader::parse(&image).unwrap();
        reader.verify().unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["boot.bin", OTA_MANIFEST, "app.bin"]);

        let entry = reader.entry(OTA_MANIFEST).unwrap();
        let xml = String::from_utf8(reader.data(entry).unwrap().to_vec()).unwrap();
        let expected = format!(
            "<ota_firmware>\n{}{}\t<partitions/>\n</ota_firmware>\n",
            version_element("old_firmware_version", &version(1)),
            version_element("firmware_version", &version(2)),
        );
        assert_eq!(xml, expected);
        let app = reader.entry("app.bin").unwrap();
        assert_eq!(reader.data(app).unwrap(), b"1-ppa");
    }

    #[test]
    fn test_patch_sequenced() {
        let fx = fixture(1, 2, OLD_FILES);
        let runner = RecordingRunner::default();
        let sequencer = OtaSequencer::new(
            vec![
                SequencePartition::new(PartitionType::Boot, Some("boot.bin"), true),
                SequencePartition::new(PartitionType::System, Some("app.bin"), true),
            ],
            SequenceVariant::Patch,
        );
        let image = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"))
            .with_sequencer(sequencer)
            .build(&fx.old, &fx.new)
            .unwrap();
        let reader = OtaReader::parse(&image).unwrap();
        let names: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [OTA_MANIFEST, "app.bin", "boot.bin"]);
    }

    #[test]
    fn test_version_must_increase() {
        let fx = fixture(2, 2, OLD_FILES);
        let runner = RecordingRunner::default();
        let err = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"))
            .build(&fx.old, &fx.new)
            .unwrap_err();
        assert!(matches!(err, Error::VersionNotNewer { old: 2, new: 2 }));
    }

    #[test]
    fn test_missing_old_file() {
        let fx = fixture(1, 2, &[("boot.bin", b"boot-1"), (OTA_MANIFEST, b"")]);
        let runner = RecordingRunner::default();
        let err = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"))
            .build(&fx.old, &fx.new)
            .unwrap_err();
        assert!(matches!(&err, Error::InputMissing(path) if path.ends_with("old_ota/app.bin")));
    }

    #[test]
    fn test_diff_failure_aborts() {
        let fx = fixture(1, 2, OLD_FILES);
        let runner = RecordingRunner {
            fail_code: Some(1),
            ..Default::default()
        };
        let out = fx.dir.path().join("patch.ota");
        let err = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"))
            .write_to(&fx.old, &fx.new, &out)
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool { code: Some(1), .. }));
        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(!out.exists());
    }

    #[test]
    fn test_old_image_without_version() {
        let fx = fixture(1, 2, OLD_FILES);
        let xml = manifest(0);
        fs::write(
            &fx.old,
            ota_image_with(
                FirmwareVersion::default(),
                &[("boot.bin", b"boot-1"), (OTA_MANIFEST, xml.as_slice()), ("app.bin", b"app-1")],
            ),
        )
        .unwrap();
        let runner = RecordingRunner::default();
        let err = OtaPatchBuilder::new(&runner, "hdiff", fx.dir.path().join("work"))
            .build(&fx.old, &fx.new)
            .unwrap_err();
        assert!(matches!(&err, Error::MissingVersion(path) if *path == fx.old));
    }

    #[test]
    fn test_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let err = OtaPatchBuilder::new(&runner, "hdiff", dir.path())
            .build(&dir.path().join("old.ota"), &dir.path().join("new.ota"))
            .unwrap_err();
        assert!(matches!(err, Error::InputMissing(_)));
    }
}
