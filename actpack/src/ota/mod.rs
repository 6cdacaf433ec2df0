//! OTA image assembly on top of the OTA container: file ordering, the
//! manifest text and patch images.

pub mod manifest;
pub mod patch;
pub mod sequencer;

pub use patch::{OtaPatchBuilder, PatchStage};
pub use sequencer::{
    BOOT_SEQUENCE, OtaSequencer, SYS_PARAM_SEQUENCE, SequencePartition, SequenceVariant,
};
