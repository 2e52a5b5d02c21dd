//! Staging: produce a transform's output in the scratch workspace.
//!
//! The build directory is only ever read here. A collaborator failure leaves
//! the scratch output in place for post-mortem inspection.

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::FileState;
use crate::build_store::BuildDir;
use crate::collab::commit_store::{CommitStatus, CommitStore};
use crate::collab::compress::{self, Compression};
use crate::collab::convert::{self, CommitRef, Platform};
use crate::collab::upload::{self, UploadTarget};
use crate::collab::Toolbox;
use crate::descriptor::BuildDescriptor;
use crate::error::{PipelineError, Result};
use crate::fsops::sha256_file;
use crate::transform::{scratch_name, Step, Transform, COMMIT_IMAGE, SOURCE_IMAGE};

/// How a staged file changes the image's record on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEffect {
    /// Replace content, keeping the previous identity as provenance.
    Replace,
    /// Replace content with the original and drop provenance.
    Restore,
    /// Insert (or overwrite) the key with a fresh record.
    Insert,
}

/// A new file waiting in scratch space, already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub key: String,
    pub scratch_path: PathBuf,
    /// Final name relative to the build directory.
    pub final_name: String,
    pub sha256: String,
    pub size: u64,
    pub effect: RecordEffect,
}

/// Output of a successful staging step.
#[derive(Debug, Clone, PartialEq)]
pub enum Staged {
    File(StagedFile),
    /// Descriptor-only change: a top-level field recording remote state.
    Remote {
        key: String,
        field: String,
        value: serde_json::Value,
    },
}

pub struct TransformRunner<'a> {
    toolbox: &'a Toolbox,
    scratch: &'a Path,
    threads: Option<u32>,
    commit_store: &'a CommitStore,
}

impl<'a> TransformRunner<'a> {
    pub fn new(
        toolbox: &'a Toolbox,
        scratch: &'a Path,
        threads: Option<u32>,
        commit_store: &'a CommitStore,
    ) -> Self {
        Self {
            toolbox,
            scratch,
            threads,
            commit_store,
        }
    }

    pub fn stage(&self, dir: &BuildDir, descriptor: &BuildDescriptor, step: &Step) -> Result<Staged> {
        match &step.transform {
            Transform::Compress { algorithm, fast } => {
                self.compress(dir, descriptor, &step.key, *algorithm, *fast)
            }
            Transform::Decompress => self.decompress(dir, descriptor, &step.key),
            Transform::DerivePlatform { platform } => {
                self.derive(dir, descriptor, &step.key, *platform)
            }
            Transform::Upload { platform, target } => {
                self.upload(dir, descriptor, &step.key, *platform, target)
            }
        }
    }

    fn source_path(&self, dir: &BuildDir, descriptor: &BuildDescriptor, key: &str) -> Result<(String, PathBuf)> {
        let rec = descriptor.image(key).ok_or_else(|| {
            PipelineError::not_found(format!("image '{key}' in build {}", dir.label()))
        })?;
        Ok((rec.path.clone(), dir.artifact_path(&rec.path)))
    }

    fn hashed(&self, key: &str, scratch_path: PathBuf, final_name: String, effect: RecordEffect) -> Result<Staged> {
        let (sha256, size) = sha256_file(&scratch_path)?;
        Ok(Staged::File(StagedFile {
            key: key.to_string(),
            scratch_path,
            final_name,
            sha256,
            size,
            effect,
        }))
    }

    fn compress(
        &self,
        dir: &BuildDir,
        descriptor: &BuildDescriptor,
        key: &str,
        algorithm: Compression,
        fast: bool,
    ) -> Result<Staged> {
        let (rel, input) = self.source_path(dir, descriptor, key)?;
        let final_name = format!("{rel}{}", algorithm.suffix());
        let output = self.scratch.join(scratch_name(&final_name));

        log::info!("{}: compressing '{key}' ({rel}) with {algorithm}", dir.label());
        compress::compress(self.toolbox, algorithm, fast, self.threads, &input, &output)?;
        self.hashed(key, output, final_name, RecordEffect::Replace)
    }

    fn decompress(&self, dir: &BuildDir, descriptor: &BuildDescriptor, key: &str) -> Result<Staged> {
        let (rel, input) = self.source_path(dir, descriptor, key)?;
        let algorithm = Compression::from_path(&rel).ok_or_else(|| PipelineError::Inconsistent {
            message: format!("image '{key}' ({rel}) is not compressed"),
        })?;
        let final_name = rel
            .strip_suffix(algorithm.suffix())
            .unwrap_or(&rel)
            .to_string();
        let output = self.scratch.join(scratch_name(&final_name));

        log::info!("{}: decompressing '{key}' ({rel})", dir.label());
        compress::decompress(self.toolbox, algorithm, &input, &output)?;

        let staged = self.hashed(key, output, final_name, RecordEffect::Restore)?;
        if let (Staged::File(file), Some(expected)) = (
            &staged,
            descriptor.image(key).and_then(|r| r.uncompressed_sha256.as_ref()),
        ) {
            if &file.sha256 != expected {
                return Err(PipelineError::ChecksumMismatch {
                    path: file.scratch_path.clone(),
                    expected: expected.clone(),
                    actual: file.sha256.clone(),
                });
            }
        }
        Ok(staged)
    }

    fn derive(
        &self,
        dir: &BuildDir,
        descriptor: &BuildDescriptor,
        key: &str,
        platform: Platform,
    ) -> Result<Staged> {
        let (qemu_rel, qemu_path) = self.source_path(dir, descriptor, SOURCE_IMAGE)?;
        if Compression::from_path(&qemu_rel).is_some() {
            return Err(PipelineError::not_found(format!(
                "uncompressed '{SOURCE_IMAGE}' image in build {} (run decompress first)",
                dir.label()
            )));
        }

        let commit = match &descriptor.ostree_commit {
            Some(commit) => {
                let archive = descriptor
                    .image(COMMIT_IMAGE)
                    .map(|r| dir.artifact_path(&r.path));
                let status = self.commit_store.ensure_commit(
                    self.toolbox,
                    commit,
                    archive.as_deref(),
                    self.scratch,
                )?;
                if status == CommitStatus::Imported {
                    log::info!("{}: re-imported commit {commit}", dir.label());
                }
                Some(CommitRef {
                    repo: self.commit_store.repo(),
                    commit,
                })
            }
            None => None,
        };

        let qemu_filename = Path::new(&qemu_rel)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| qemu_rel.clone());
        let final_name = platform.derived_filename(&qemu_filename);
        let output = self.scratch.join(scratch_name(&final_name));
        let tagged = self.scratch.join(format!("{key}.tagged.qcow2"));

        log::info!("{}: building '{key}' image from {qemu_rel}", dir.label());
        convert::tag_platform(self.toolbox, platform, &qemu_path, &tagged, commit)?;

        let format = platform.format();
        if format.format == "qcow2" {
            fs::rename(&tagged, &output).map_err(|e| PipelineError::io(&output, e))?;
        } else {
            convert::convert(self.toolbox, format, &tagged, &output)?;
        }
        self.hashed(key, output, final_name, RecordEffect::Insert)
    }

    fn upload(
        &self,
        dir: &BuildDir,
        descriptor: &BuildDescriptor,
        key: &str,
        platform: Platform,
        target: &UploadTarget,
    ) -> Result<Staged> {
        let rec = descriptor.image(platform.name()).ok_or_else(|| {
            PipelineError::not_found(format!(
                "'{platform}' image in build {} (run buildextend first)",
                dir.label()
            ))
        })?;
        if rec.check_file(&dir.path)? != FileState::Matches {
            return Err(PipelineError::Inconsistent {
                message: format!(
                    "'{platform}' image '{}' of build {} does not match its recorded checksum",
                    rec.path,
                    dir.label()
                ),
            });
        }

        let file = dir.artifact_path(&rec.path);
        log::info!("{}: uploading '{}' to {platform}", dir.label(), rec.path);
        let record = upload::upload_blob(self.toolbox, platform, target, &file)?;
        let value = serde_json::to_value(&record).map_err(|e| PipelineError::Inconsistent {
            message: format!("unserializable upload record: {e}"),
        })?;
        Ok(Staged::Remote {
            key: key.to_string(),
            field: platform.name().to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRecord;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        dir: BuildDir,
        scratch: PathBuf,
        store: CommitStore,
        toolbox: Toolbox,
        meta: BuildDescriptor,
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let build = tmp.path().join("build");
        let scratch = tmp.path().join("scratch");
        let bin = tmp.path().join("bin");
        fs::create_dir_all(&build).unwrap();
        fs::create_dir_all(&scratch).unwrap();
        fs::create_dir_all(&bin).unwrap();

        let toolbox = Toolbox {
            platform_tag: script(&bin, "tag", "cp \"$1\" \"$2\" && printf '%s' \"$3\" >> \"$2\""),
            qemu_img: script(
                &bin,
                "qemu-img",
                "for last in \"$@\"; do :; done\nsrc=\"\"\nprev=\"\"\nfor a in \"$@\"; do src=\"$prev\"; prev=\"$a\"; done\n{ cat \"$src\"; echo converted; } > \"$last\"",
            ),
            ..Toolbox::default()
        };

        fs::write(build.join("disk.qcow2"), b"qcow2 bytes").unwrap();
        let (sha, size) = sha256_file(&build.join("disk.qcow2")).unwrap();
        let mut meta = BuildDescriptor::new("1");
        meta.insert_image("qemu", ArtifactRecord::new("disk.qcow2", sha, size));

        Fixture {
            store: CommitStore::new(tmp.path().join("repo")),
            dir: BuildDir {
                build_id: "1".into(),
                arch: None,
                path: build,
            },
            scratch,
            toolbox,
            meta,
            _tmp: tmp,
        }
    }

    #[test]
    fn compress_stages_in_scratch_only() {
        let fx = fixture();
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let step = Step::new(
            "qemu",
            Transform::Compress {
                algorithm: Compression::Gzip,
                fast: true,
            },
        );
        let Staged::File(file) = runner.stage(&fx.dir, &fx.meta, &step).unwrap() else {
            panic!("expected a staged file");
        };
        assert_eq!(file.final_name, "disk.qcow2.gz");
        assert_eq!(file.scratch_path, fx.scratch.join("disk.qcow2.gz"));
        assert_eq!(file.effect, RecordEffect::Replace);
        assert_eq!((file.sha256.clone(), file.size), sha256_file(&file.scratch_path).unwrap());
        assert!(!fx.dir.artifact_path("disk.qcow2.gz").exists());
    }

    #[test]
    fn derive_tags_then_converts() {
        let fx = fixture();
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let step = Step::new(
            "azure",
            Transform::DerivePlatform {
                platform: Platform::Azure,
            },
        );
        let Staged::File(file) = runner.stage(&fx.dir, &fx.meta, &step).unwrap() else {
            panic!("expected a staged file");
        };
        assert_eq!(file.final_name, "disk-azure.vhd");
        assert_eq!(file.effect, RecordEffect::Insert);
        let bytes = fs::read(&file.scratch_path).unwrap();
        assert_eq!(bytes, b"qcow2 bytesazureconverted\n");
    }

    #[test]
    fn derive_qcow2_platform_skips_conversion() {
        let fx = fixture();
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let step = Step::new(
            "openstack",
            Transform::DerivePlatform {
                platform: Platform::OpenStack,
            },
        );
        let Staged::File(file) = runner.stage(&fx.dir, &fx.meta, &step).unwrap() else {
            panic!("expected a staged file");
        };
        assert_eq!(fs::read(&file.scratch_path).unwrap(), b"qcow2 bytesopenstack");
    }

    #[test]
    fn derive_needs_uncompressed_qemu() {
        let mut fx = fixture();
        fx.meta.image_mut("qemu").unwrap().path = "disk.qcow2.gz".into();
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let step = Step::new(
            "azure",
            Transform::DerivePlatform {
                platform: Platform::Azure,
            },
        );
        assert!(runner.stage(&fx.dir, &fx.meta, &step).unwrap_err().is_not_found());
    }

    #[test]
    fn failing_collaborator_leaves_build_dir_untouched() {
        let mut fx = fixture();
        fx.toolbox.platform_tag = script(&fx.scratch, "broken-tag", "echo boom >&2; exit 1");
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let step = Step::new(
            "azure",
            Transform::DerivePlatform {
                platform: Platform::Azure,
            },
        );
        let err = runner.stage(&fx.dir, &fx.meta, &step).unwrap_err();
        assert!(matches!(err, PipelineError::CollaboratorFailure { .. }));
        let names: Vec<_> = fs::read_dir(&fx.dir.path)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("disk.qcow2")]);
    }

    #[test]
    fn decompress_verifies_original_checksum() {
        let mut fx = fixture();
        let runner = TransformRunner::new(&fx.toolbox, &fx.scratch, None, &fx.store);
        let gz = fx.dir.artifact_path("disk.qcow2.gz");
        compress::compress(
            &fx.toolbox,
            Compression::Gzip,
            false,
            None,
            &fx.dir.artifact_path("disk.qcow2"),
            &gz,
        )
        .unwrap();
        let (sha, size) = sha256_file(&gz).unwrap();
        let rec = fx.meta.image_mut("qemu").unwrap();
        rec.replace_keeping_provenance("disk.qcow2.gz".into(), sha, size);
        rec.uncompressed_sha256 = Some("0".repeat(64));

        let step = Step::new("qemu", Transform::Decompress);
        assert!(matches!(
            runner.stage(&fx.dir, &fx.meta, &step).unwrap_err(),
            PipelineError::ChecksumMismatch { .. }
        ));
    }
}
