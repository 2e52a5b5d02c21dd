//! Typed view over a build's `meta.json`.
//!
//! Only `buildid`, `images` and `ostree-commit` are typed. Every other
//! top-level key lands in [`BuildDescriptor::extra`] and is written back
//! verbatim, so fields owned by other tooling survive a load/save cycle.
//! On save the typed keys come first, followed by the untyped keys in
//! their original relative order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRecord;
use crate::error::{PipelineError, Result};
use crate::fsops::write_json_atomic;

pub const DESCRIPTOR_FILENAME: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    #[serde(rename = "buildid")]
    pub build_id: String,
    #[serde(
        rename = "ostree-commit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ostree_commit: Option<String>,
    #[serde(default)]
    pub images: BTreeMap<String, ArtifactRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BuildDescriptor {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            ostree_commit: None,
            images: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Load `meta.json` from a build directory.
    pub fn load(build_dir: &Path) -> Result<Self> {
        let path = build_dir.join(DESCRIPTOR_FILENAME);
        let bytes = fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
        let descriptor: Self = serde_json::from_slice(&bytes).map_err(|e| PipelineError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        for (key, rec) in &descriptor.images {
            rec.validate_path().map_err(|message| PipelineError::Parse {
                path: path.clone(),
                message: format!("image '{key}': {message}"),
            })?;
        }
        Ok(descriptor)
    }

    /// Atomically rewrite `meta.json` in a build directory.
    pub fn save(&self, build_dir: &Path) -> Result<()> {
        let path = build_dir.join(DESCRIPTOR_FILENAME);
        write_json_atomic(&path, self)?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    pub fn image(&self, key: &str) -> Option<&ArtifactRecord> {
        self.images.get(key)
    }

    pub fn image_mut(&mut self, key: &str) -> Option<&mut ArtifactRecord> {
        self.images.get_mut(key)
    }

    pub fn insert_image(&mut self, key: impl Into<String>, record: ArtifactRecord) {
        self.images.insert(key.into(), record);
    }

    pub fn extra_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn set_extra_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }

    /// Whether any image other than `except` records `path`.
    pub fn path_referenced_by_other(&self, path: &str, except: &str) -> bool {
        self.images
            .iter()
            .any(|(key, rec)| key != except && rec.path == path)
    }
}
