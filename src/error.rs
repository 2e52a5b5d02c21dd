//! Error taxonomy for build post-processing.
//!
//! Every variant is fatal for the invocation. "Nothing to do" is not an
//! error and is reported through [`crate::pipeline::StepOutcome`] instead.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Requested build, build directory, descriptor, or image is absent.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Descriptor or build history is not valid JSON or lacks required keys.
    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    /// External tool exited nonzero.
    #[error("{tool} failed ({status}): {stderr}")]
    CollaboratorFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    /// External tool could not be started.
    #[error("failed to start {tool}: {source}")]
    CollaboratorSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The atomic descriptor rewrite did not complete.
    #[error("failed to persist descriptor '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Descriptor and build directory disagree in a way a rerun cannot repair.
    #[error("build directory inconsistent with descriptor: {message}")]
    Inconsistent { message: String },

    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Wrap an `io::Error` with its path, mapping `NotFound` onto the taxonomy.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound {
                what: path.display().to_string(),
            };
        }
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn persistence(path: &Path, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = PipelineError::io(Path::new("/nope"), Error::new(ErrorKind::NotFound, "x"));
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/nope"));
    }

    #[test]
    fn io_other_kinds_stay_io() {
        let err = PipelineError::io(
            Path::new("/ro"),
            Error::new(ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
