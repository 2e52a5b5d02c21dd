//! Idempotence checks: has a transform already been applied to an image?
//!
//! A suffix or key is never trusted on its own. The recorded checksum is
//! verified against the file on disk before concluding the work is done, so
//! a crash between renaming a new artifact into place and rewriting the
//! descriptor cannot be mistaken for a completed transform.

use std::path::PathBuf;

use crate::artifact::{ArtifactRecord, FileState};
use crate::build_store::BuildDir;
use crate::collab::compress::Compression;
use crate::descriptor::BuildDescriptor;
use crate::error::{PipelineError, Result};
use crate::transform::{Step, Transform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    Run,
    /// Nothing to do. `strays` are by-products of an interrupted earlier run
    /// that should be removed, tolerating their absence.
    AlreadyDone { strays: Vec<PathBuf> },
}

pub fn evaluate(
    step: &Step,
    descriptor: &BuildDescriptor,
    dir: &BuildDir,
    force: bool,
) -> Result<SkipDecision> {
    match &step.transform {
        Transform::Compress { .. } => compress(step, descriptor, dir),
        Transform::Decompress => decompress(step, descriptor, dir),
        Transform::DerivePlatform { .. } => derive(step, descriptor, dir, force),
        Transform::Upload { platform, .. } => {
            if force || descriptor.extra_field(platform.name()).is_none() {
                Ok(SkipDecision::Run)
            } else {
                Ok(SkipDecision::AlreadyDone { strays: Vec::new() })
            }
        }
    }
}

fn record<'a>(
    descriptor: &'a BuildDescriptor,
    step: &Step,
    dir: &BuildDir,
) -> Result<&'a ArtifactRecord> {
    descriptor.image(&step.key).ok_or_else(|| {
        PipelineError::not_found(format!("image '{}' in build {}", step.key, dir.label()))
    })
}

/// The record must describe the file at its path exactly.
fn require_consistent(rec: &ArtifactRecord, step: &Step, dir: &BuildDir) -> Result<()> {
    match rec.check_file(&dir.path)? {
        FileState::Matches => Ok(()),
        FileState::Missing => Err(PipelineError::Inconsistent {
            message: format!(
                "image '{}' of build {} records '{}' but the file is missing",
                step.key,
                dir.label(),
                rec.path
            ),
        }),
        FileState::Differs { size, .. } => Err(PipelineError::Inconsistent {
            message: format!(
                "image '{}' of build {}: '{}' does not match its recorded checksum (recorded size {}, actual {})",
                step.key,
                dir.label(),
                rec.path,
                rec.size,
                size
            ),
        }),
    }
}

/// A leftover file is only a stray if no image still records it.
fn stray_if_unreferenced(descriptor: &BuildDescriptor, dir: &BuildDir, rel: &str) -> Option<PathBuf> {
    if descriptor.images.values().any(|r| r.path == rel) {
        return None;
    }
    Some(dir.artifact_path(rel))
}

fn compress(step: &Step, descriptor: &BuildDescriptor, dir: &BuildDir) -> Result<SkipDecision> {
    let rec = record(descriptor, step, dir)?;
    require_consistent(rec, step, dir)?;

    let Some(present) = Compression::from_path(&rec.path) else {
        return Ok(SkipDecision::Run);
    };
    let original = rec
        .path
        .strip_suffix(present.suffix())
        .unwrap_or(&rec.path);
    let strays = stray_if_unreferenced(descriptor, dir, original)
        .into_iter()
        .collect();
    Ok(SkipDecision::AlreadyDone { strays })
}

fn decompress(step: &Step, descriptor: &BuildDescriptor, dir: &BuildDir) -> Result<SkipDecision> {
    let rec = record(descriptor, step, dir)?;
    require_consistent(rec, step, dir)?;

    if Compression::from_path(&rec.path).is_some() {
        return Ok(SkipDecision::Run);
    }
    let strays = Compression::ALL
        .into_iter()
        .filter_map(|c| {
            stray_if_unreferenced(descriptor, dir, &format!("{}{}", rec.path, c.suffix()))
        })
        .collect();
    Ok(SkipDecision::AlreadyDone { strays })
}

fn derive(
    step: &Step,
    descriptor: &BuildDescriptor,
    dir: &BuildDir,
    force: bool,
) -> Result<SkipDecision> {
    let Some(rec) = descriptor.image(&step.key) else {
        return Ok(SkipDecision::Run);
    };
    if force {
        log::info!(
            "{}: forcing rebuild of existing '{}' image",
            dir.label(),
            step.key
        );
        return Ok(SkipDecision::Run);
    }
    match rec.check_file(&dir.path)? {
        FileState::Matches => Ok(SkipDecision::AlreadyDone { strays: Vec::new() }),
        state => {
            log::warn!(
                "{}: recorded '{}' image '{}' is stale ({:?}); rebuilding",
                dir.label(),
                step.key,
                rec.path,
                state
            );
            Ok(SkipDecision::Run)
        }
    }
}
