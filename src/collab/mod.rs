//! External collaborators: the programs that do the heavy lifting.
//!
//! Each collaborator has a narrow contract (input path in, output path out,
//! nonzero exit is fatal). Program names come from the [`Toolbox`], which is
//! filled from configuration so hosts and tests can point at other binaries.

pub mod commit_store;
pub mod compress;
pub mod convert;
pub mod upload;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Program names (or paths) for every external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Toolbox {
    pub gzip: String,
    pub xz: String,
    pub zstd: String,
    pub qemu_img: String,
    pub platform_tag: String,
    pub ostree: String,
    pub tar: String,
    pub uploader: String,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            gzip: "gzip".into(),
            xz: "xz".into(),
            zstd: "zstd".into(),
            qemu_img: "qemu-img".into(),
            platform_tag: "gf-platformid".into(),
            ostree: "ostree".into(),
            tar: "tar".into(),
            uploader: "ore".into(),
        }
    }
}

impl Toolbox {
    /// Verify the given programs resolve on this host.
    pub fn check(&self, programs: &[&str]) -> Result<()> {
        let missing: Vec<&str> = programs
            .iter()
            .copied()
            .filter(|p| which::which(p).is_err())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(PipelineError::not_found(format!(
            "required host tools: {}",
            missing.join(", ")
        )))
    }
}
