//! Install order of files inside an OTA image.
//!
//! The update client writes files in directory order, so the image is sorted
//! to put the boot loader (and, for full images, the parameter block) last.
//! A power loss in the middle of an update then still leaves a bootable
//! device.

use std::path::Path;

use crate::partition::PartitionType;

/// Sort key of the boot partition file.
pub const BOOT_SEQUENCE: u32 = 0x10000;
/// Sort key of the SYS_PARAM file in full images.
pub const SYS_PARAM_SEQUENCE: u32 = 0x10001;

/// Which kind of image is being ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequenceVariant {
    /// Full firmware: BOOT then SYS_PARAM go last.
    #[default]
    Full,
    /// Patch image: only BOOT is forced last.
    Patch,
}

/// Partition metadata the sequencer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePartition {
    pub part_type: PartitionType,
    pub file_name: Option<String>,
    pub enable_ota: bool,
}

impl SequencePartition {
    pub fn new(part_type: PartitionType, file_name: Option<&str>, enable_ota: bool) -> Self {
        Self {
            part_type,
            file_name: file_name.map(str::to_string),
            enable_ota,
        }
    }
}

/// Computes the deterministic install order of OTA files.
#[derive(Debug, Clone, Default)]
pub struct OtaSequencer {
    partitions: Vec<SequencePartition>,
    variant: SequenceVariant,
}

impl OtaSequencer {
    /// `partitions` must be in partition table order.
    pub fn new(partitions: Vec<SequencePartition>, variant: SequenceVariant) -> Self {
        Self {
            partitions,
            variant,
        }
    }

    /// Sort key of `file`: 0 for unknown files, partition index + 1 for
    /// ordinary ones and a large constant for files that must go last.
    ///
    /// When several partitions share the file name the last one wins.
    pub fn key(&self, file: impl AsRef<Path>) -> u32 {
        let Some(name) = file.as_ref().file_name().and_then(|n| n.to_str()) else {
            return 0;
        };

        let mut seq = 0;
        for (index, part) in self.partitions.iter().enumerate() {
            if !part.enable_ota || part.file_name.as_deref() != Some(name) {
                continue;
            }
            seq = match (part.part_type, self.variant) {
                (PartitionType::Boot, _) => BOOT_SEQUENCE,
                (PartitionType::SysParam, SequenceVariant::Full) => SYS_PARAM_SEQUENCE,
                _ => index as u32 + 1,
            };
        }
        seq
    }

    /// Stable-sorts `files` by [`Self::key`].
    pub fn sort<P: AsRef<Path>>(&self, files: &mut [P]) {
        files.sort_by_key(|f| self.key(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions() -> Vec<SequencePartition> {
        vec![
            SequencePartition::new(PartitionType::System, Some("a.bin"), true),
            SequencePartition::new(PartitionType::Boot, Some("mbrec.bin"), true),
            SequencePartition::new(PartitionType::Data, Some("b.bin"), true),
            SequencePartition::new(PartitionType::SysParam, Some("param.bin"), true),
            SequencePartition::new(PartitionType::Data, Some("c.bin"), false),
            SequencePartition::new(PartitionType::Temp, None, true),
        ]
    }

    #[test]
    fn test_full_order() {
        let seq = OtaSequencer::new(partitions(), SequenceVariant::Full);
        let mut files = vec!["ota/a.bin", "ota/mbrec.bin", "ota/b.bin", "ota/param.bin"];
        seq.sort(&mut files);
        assert_eq!(files, ["ota/a.bin", "ota/b.bin", "ota/mbrec.bin", "ota/param.bin"]);
    }

    #[test]
    fn test_keys() {
        let seq = OtaSequencer::new(partitions(), SequenceVariant::Full);
        assert_eq!(seq.key("a.bin"), 1);
        assert_eq!(seq.key("b.bin"), 3);
        assert_eq!(seq.key("mbrec.bin"), BOOT_SEQUENCE);
        assert_eq!(seq.key("param.bin"), SYS_PARAM_SEQUENCE);
        // not OTA enabled
        assert_eq!(seq.key("c.bin"), 0);
        assert_eq!(seq.key("ota.xml"), 0);
    }

    #[test]
    fn test_patch_variant_keeps_param_in_place() {
        let seq = OtaSequencer::new(partitions(), SequenceVariant::Patch);
        assert_eq!(seq.key("param.bin"), 4);
        let mut files = vec!["mbrec.bin", "param.bin", "ota.xml", "a.bin"];
        seq.sort(&mut files);
        assert_eq!(files, ["ota.xml", "a.bin", "param.bin", "mbrec.bin"]);
    }

    #[test]
    fn test_last_match_wins() {
        let seq = OtaSequencer::new(
            vec![
                SequencePartition::new(PartitionType::Boot, Some("x.bin"), true),
                SequencePartition::new(PartitionType::Data, Some("x.bin"), true),
            ],
            SequenceVariant::Full,
        );
        assert_eq!(seq.key("x.bin"), 2);
    }

    #[test]
    fn test_sort_is_stable() {
        let seq = OtaSequencer::new(partitions(), SequenceVariant::Full);
        let mut files = vec!["z.txt", "ota.xml", "y.txt"];
        seq.sort(&mut files);
        assert_eq!(files, ["z.txt", "ota.xml", "y.txt"]);
    }
}
