//! `image-postprocess.toml`, read from the working directory.
//!
//! ```toml
//! [compress]
//! algorithm = "xz"
//!
//! [tools]
//! qemu_img = "/usr/local/bin/qemu-img"
//! ```
//!
//! The file is optional; every key has a default.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::collab::compress::Compression;
use crate::collab::Toolbox;
use crate::error::{PipelineError, Result};

pub const CONFIG_FILENAME: &str = "image-postprocess.toml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub compress: CompressConfig,
    pub tools: Toolbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompressConfig {
    /// Algorithm used when `compress` is not given `--compressor`.
    pub algorithm: Compression,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            algorithm: Compression::Gzip,
        }
    }
}

impl Config {
    /// Load `<workdir>/image-postprocess.toml`, or defaults if absent.
    pub fn load(workdir: &Path) -> Result<Self> {
        let path = workdir.join(CONFIG_FILENAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        toml::from_str(&text).map_err(|e| PipelineError::Config {
            message: format!("parsing '{}': {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.compress.algorithm, Compression::Gzip);
        assert_eq!(config.tools, Toolbox::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[compress]\nalgorithm = \"zstd\"\n\n[tools]\nqemu_img = \"/opt/qemu-img\"\n",
        )
        .unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.compress.algorithm, Compression::Zstd);
        assert_eq!(config.tools.qemu_img, "/opt/qemu-img");
        assert_eq!(config.tools.gzip, "gzip");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[tools]\nlz4 = \"lz4\"\n").unwrap();
        let err = Config::load(tmp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[compress]\nalgorithm = \"lz4\"\n",
        )
        .unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
