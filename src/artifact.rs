//! One named artifact as tracked inside a build descriptor.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsops::sha256_file;

/// `path`/`sha256`/`size` triple plus provenance of an in-place replacement.
///
/// `sha256` and `size` always describe the file currently at `path` inside the
/// build directory; they only change in the same commit that moves a new file
/// into place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub sha256: String,
    pub size: u64,
    #[serde(
        rename = "uncompressed-sha256",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub uncompressed_sha256: Option<String>,
    #[serde(
        rename = "uncompressed-size",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub uncompressed_size: Option<u64>,
    /// Per-image keys this crate does not own, written back verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of checking a record against the file it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Matches,
    Missing,
    Differs { sha256: String, size: u64 },
}

impl ArtifactRecord {
    pub fn new(path: impl Into<String>, sha256: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            sha256: sha256.into(),
            size,
            uncompressed_sha256: None,
            uncompressed_size: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Compare the record with the file at `path` under `build_dir`.
    ///
    /// Size is checked first so an obviously different file is not hashed.
    pub fn check_file(&self, build_dir: &Path) -> Result<FileState> {
        let file = build_dir.join(&self.path);
        let size = match std::fs::metadata(&file) {
            Ok(md) => md.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileState::Missing),
            Err(e) => return Err(crate::error::PipelineError::io(&file, e)),
        };
        if size != self.size {
            return Ok(FileState::Differs {
                sha256: String::new(),
                size,
            });
        }
        let (sha256, size) = sha256_file(&file)?;
        if sha256 == self.sha256 {
            Ok(FileState::Matches)
        } else {
            Ok(FileState::Differs { sha256, size })
        }
    }

    /// Record new content in place, keeping the previous identity as provenance.
    ///
    /// Provenance is only captured the first time, so repeated replacement
    /// never overwrites the original pre-transform identity.
    pub fn replace_keeping_provenance(&mut self, path: String, sha256: String, size: u64) {
        if self.uncompressed_sha256.is_none() {
            self.uncompressed_sha256 = Some(std::mem::take(&mut self.sha256));
            self.uncompressed_size = Some(self.size);
        }
        self.path = path;
        self.sha256 = sha256;
        self.size = size;
    }

    /// Record restored original content and drop provenance fields.
    pub fn restore_original(&mut self, path: String, sha256: String, size: u64) {
        self.uncompressed_sha256 = None;
        self.uncompressed_size = None;
        self.path = path;
        self.sha256 = sha256;
        self.size = size;
    }

    /// `path` must name a location inside the build directory: non-empty,
    /// relative, and free of `.`/`..` components.
    pub fn validate_path(&self) -> std::result::Result<(), String> {
        if self.path.is_empty() {
            return Err("artifact path must not be empty".into());
        }
        let unsafe_component = Path::new(&self.path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if unsafe_component || self.path.contains('\\') {
            return Err(format!(
                "artifact path '{}' must be relative to the build directory",
                self.path
            ));
        }
        Ok(())
    }

    pub fn skip_compression(&self) -> bool {
        self.extra
            .get("skip-compression")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
