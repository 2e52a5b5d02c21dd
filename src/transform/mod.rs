//! The closed set of post-processing transforms.
//!
//! Every transform shares the same contract: a [`skip`] predicate decides
//! whether work is needed, the [`runner`] stages the new artifact in scratch
//! space through an external collaborator, and [`crate::commit`] installs it.

pub mod runner;
pub mod skip;

use crate::collab::compress::Compression;
use crate::collab::convert::Platform;
use crate::collab::upload::UploadTarget;

/// Images that are never compressed: already containers or boot payloads
/// consumed as-is.
pub const NEVER_COMPRESS: &[&str] = &[
    "ostree",
    "live-iso",
    "live-kernel",
    "live-initramfs",
    "live-rootfs",
    "vmware",
    "gcp",
];

/// Image every platform image is derived from.
pub const SOURCE_IMAGE: &str = "qemu";

/// Image holding the build's commit archive.
pub const COMMIT_IMAGE: &str = "ostree";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Replace an image with its compressed form.
    Compress { algorithm: Compression, fast: bool },
    /// Replace a compressed image with the original bytes.
    Decompress,
    /// Add a new image derived from the qemu image.
    DerivePlatform { platform: Platform },
    /// Upload an existing platform image and record where it went.
    Upload {
        platform: Platform,
        target: UploadTarget,
    },
}

impl Transform {
    /// Past-tense verb for "already ..." and "... done" log lines.
    pub fn done_verb(&self) -> &'static str {
        match self {
            Self::Compress { .. } => "compressed",
            Self::Decompress => "uncompressed",
            Self::DerivePlatform { .. } => "built",
            Self::Upload { .. } => "uploaded",
        }
    }
}

/// One transform applied to one image key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub key: String,
    pub transform: Transform,
}

impl Step {
    pub fn new(key: impl Into<String>, transform: Transform) -> Self {
        Self {
            key: key.into(),
            transform,
        }
    }
}

/// Scratch-safe single path component for a descriptor-relative name.
pub(crate) fn scratch_name(rel: &str) -> String {
    rel.replace(['/', '\\'], "_")
}
