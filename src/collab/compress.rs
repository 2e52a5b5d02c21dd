//! Compressor collaborator.
//!
//! The tool reads the input path and writes compressed bytes to stdout,
//! which is redirected into the scratch output file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::collab::Toolbox;
use crate::error::Result;
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    pub const ALL: [Compression; 3] = [Compression::Gzip, Compression::Xz, Compression::Zstd];

    /// Filename suffix including the dot.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
        }
    }

    /// Algorithm implied by a filename's suffix.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| path.ends_with(c.suffix()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    /// Program implementing this algorithm.
    pub fn program(self, toolbox: &Toolbox) -> &str {
        match self {
            Self::Gzip => &toolbox.gzip,
            Self::Xz => &toolbox.xz,
            Self::Zstd => &toolbox.zstd,
        }
    }

    fn compress_args(self, fast: bool, threads: Option<u32>) -> Vec<String> {
        let threads = format!("-T{}", threads.unwrap_or(0));
        match (self, fast) {
            (Self::Gzip, false) => vec!["-c".into(), "-9".into()],
            (Self::Gzip, true) => vec!["-c".into(), "-1".into()],
            (Self::Xz, false) => vec!["-c".into(), "-9".into(), threads],
            (Self::Xz, true) => vec!["-c".into(), "-0".into(), threads],
            (Self::Zstd, false) => vec!["-q".into(), "-c".into(), "-10".into(), threads],
            (Self::Zstd, true) => vec!["-q".into(), "-c".into(), "-1".into(), threads],
        }
    }

    fn decompress_args(self) -> Vec<String> {
        match self {
            Self::Gzip => vec!["-d".into(), "-c".into()],
            Self::Xz => vec!["-d".into(), "-c".into(), "-T0".into()],
            Self::Zstd => vec!["-q".into(), "-d".into(), "-c".into()],
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "xz" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(format!(
                "unsupported compressor '{other}'; expected one of: gzip, xz, zstd"
            )),
        }
    }
}

/// Compress `input` into `output`.
///
/// `threads` is the host CPU quota; `None` lets multi-threaded tools decide.
pub fn compress(
    toolbox: &Toolbox,
    algorithm: Compression,
    fast: bool,
    threads: Option<u32>,
    input: &Path,
    output: &Path,
) -> Result<()> {
    Cmd::new(algorithm.program(toolbox))
        .args(algorithm.compress_args(fast, threads))
        .arg_path(input)
        .stdout_to(output)
        .error_msg(format!("{algorithm} compression of '{}'", input.display()))
        .run()?;
    Ok(())
}

/// Decompress `input` into `output`.
pub fn decompress(
    toolbox: &Toolbox,
    algorithm: Compression,
    input: &Path,
    output: &Path,
) -> Result<()> {
    Cmd::new(algorithm.program(toolbox))
        .args(algorithm.decompress_args())
        .arg_path(input)
        .stdout_to(output)
        .error_msg(format!("{algorithm} decompression of '{}'", input.display()))
        .run()?;
    Ok(())
}
