//! Installing a staged result into the build directory.
//!
//! Order matters: the new file is renamed into place first, then the
//! descriptor is rewritten, then the superseded file is removed. Every
//! intermediate state leaves either the old or the new record describing a
//! file that exists with matching content, so an interrupted run is resumed
//! by simply running again.

use crate::artifact::ArtifactRecord;
use crate::build_store::BuildDir;
use crate::descriptor::BuildDescriptor;
use crate::error::{PipelineError, Result};
use crate::fsops::{atomic_rename, remove_file_if_exists};
use crate::transform::runner::{RecordEffect, Staged, StagedFile};

/// Apply `staged` to `dir` and persist `descriptor`.
///
/// `descriptor` is only updated in memory once the new state is on disk, so
/// on error it still matches what is on disk.
pub fn commit(dir: &BuildDir, descriptor: &mut BuildDescriptor, staged: Staged) -> Result<()> {
    match staged {
        Staged::File(file) => commit_file(dir, descriptor, file),
        Staged::Remote { key, field, value } => {
            let mut updated = descriptor.clone();
            updated.set_extra_field(field.as_str(), value);
            updated.save(&dir.path)?;
            *descriptor = updated;
            log::debug!("{}: recorded '{field}' for '{key}'", dir.label());
            Ok(())
        }
    }
}

fn commit_file(dir: &BuildDir, descriptor: &mut BuildDescriptor, file: StagedFile) -> Result<()> {
    let mut updated = descriptor.clone();
    let previous = updated.image(&file.key).map(|r| r.path.clone());

    match file.effect {
        RecordEffect::Replace | RecordEffect::Restore => {
            let rec = updated.image_mut(&file.key).ok_or_else(|| PipelineError::Inconsistent {
                message: format!("image '{}' vanished from build {}", file.key, dir.label()),
            })?;
            if file.effect == RecordEffect::Replace {
                rec.replace_keeping_provenance(file.final_name.clone(), file.sha256, file.size);
            } else {
                rec.restore_original(file.final_name.clone(), file.sha256, file.size);
            }
        }
        RecordEffect::Insert => {
            let mut rec = ArtifactRecord::new(file.final_name.clone(), file.sha256, file.size);
            if let Some(old) = updated.image(&file.key) {
                rec.extra = old.extra.clone();
            }
            updated.insert_image(file.key.as_str(), rec);
        }
    }

    let target = dir.artifact_path(&file.final_name);
    atomic_rename(&file.scratch_path, &target)?;
    updated.save(&dir.path)?;
    *descriptor = updated;

    if let Some(old) = previous {
        if old != file.final_name && !descriptor.images.values().any(|r| r.path == old) {
            let removed = remove_file_if_exists(&dir.artifact_path(&old))?;
            if removed {
                log::debug!("{}: removed superseded '{old}'", dir.label());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::sha256_file;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup(tmp: &Path) -> (BuildDir, BuildDescriptor) {
        let build = tmp.join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("disk.qcow2"), b"original").unwrap();
        let (sha, size) = sha256_file(&build.join("disk.qcow2")).unwrap();
        let mut meta = BuildDescriptor::new("1");
        meta.insert_image("qemu", ArtifactRecord::new("disk.qcow2", sha, size));
        meta.set_extra_field("name", serde_json::json!("fcos"));
        meta.save(&build).unwrap();
        let dir = BuildDir {
            build_id: "1".into(),
            arch: None,
            path: build,
        };
        (dir, meta)
    }

    fn stage(tmp: &Path, name: &str, bytes: &[u8], key: &str, effect: RecordEffect) -> Staged {
        let scratch = tmp.join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let path = scratch.join(name);
        fs::write(&path, bytes).unwrap();
        let (sha256, size) = sha256_file(&path).unwrap();
        Staged::File(StagedFile {
            key: key.into(),
            scratch_path: path,
            final_name: name.into(),
            sha256,
            size,
            effect,
        })
    }

    #[test]
    fn replace_moves_file_and_records_provenance() {
        let tmp = TempDir::new().unwrap();
        let (dir, mut meta) = setup(tmp.path());
        let original_sha = meta.image("qemu").unwrap().sha256.clone();

        let staged = stage(tmp.path(), "disk.qcow2.gz", b"gz", "qemu", RecordEffect::Replace);
        commit(&dir, &mut meta, staged).unwrap();

        assert!(!dir.artifact_path("disk.qcow2").exists());
        assert_eq!(fs::read(dir.artifact_path("disk.qcow2.gz")).unwrap(), b"gz");

        let on_disk = BuildDescriptor::load(&dir.path).unwrap();
        assert_eq!(on_disk, meta);
        let rec = on_disk.image("qemu").unwrap();
        assert_eq!(rec.path, "disk.qcow2.gz");
        assert_eq!(rec.uncompressed_sha256.as_deref(), Some(original_sha.as_str()));
        assert_eq!(rec.uncompressed_size, Some(8));
        assert_eq!(on_disk.extra_field("name"), Some(&serde_json::json!("fcos")));
    }

    #[test]
    fn insert_keeps_source_image() {
        let tmp = TempDir::new().unwrap();
        let (dir, mut meta) = setup(tmp.path());
        let staged = stage(tmp.path(), "disk-azure.vhd", b"vhd", "azure", RecordEffect::Insert);
        commit(&dir, &mut meta, staged).unwrap();

        assert!(dir.artifact_path("disk.qcow2").exists());
        let on_disk = BuildDescriptor::load(&dir.path).unwrap();
        assert_eq!(on_disk.image("azure").unwrap().path, "disk-azure.vhd");
        assert_eq!(on_disk.image("qemu").unwrap().path, "disk.qcow2");
    }

    #[test]
    fn shared_old_path_is_not_removed() {
        let tmp = TempDir::new().unwrap();
        let (dir, mut meta) = setup(tmp.path());
        let shared = meta.image("qemu").unwrap().clone();
        meta.insert_image("openstack", shared);

        let staged = stage(tmp.path(), "disk.qcow2.gz", b"gz", "qemu", RecordEffect::Replace);
        commit(&dir, &mut meta, staged).unwrap();
        assert!(dir.artifact_path("disk.qcow2").exists());
    }

    #[test]
    fn remote_result_sets_top_level_field() {
        let tmp = TempDir::new().unwrap();
        let (dir, mut meta) = setup(tmp.path());
        let staged = Staged::Remote {
            key: "azure".into(),
            field: "azure".into(),
            value: serde_json::json!({"image": "x.vhd", "url": "c/x.vhd"}),
        };
        commit(&dir, &mut meta, staged).unwrap();
        let on_disk = BuildDescriptor::load(&dir.path).unwrap();
        assert_eq!(on_disk.extra_field("azure").unwrap()["url"], "c/x.vhd");
    }

    #[test]
    fn failed_save_of_remote_result_leaves_descriptor_untouched() {
        let tmp = TempDir::new().unwrap();
        let (_, mut meta) = setup(tmp.path());
        let before = meta.clone();
        let gone = BuildDir {
            build_id: "1".into(),
            arch: None,
            path: tmp.path().join("no-such-build"),
        };
        let staged = Staged::Remote {
            key: "azure".into(),
            field: "azure".into(),
            value: serde_json::json!({"image": "x.vhd", "url": "c/x.vhd"}),
        };
        let err = commit(&gone, &mut meta, staged).unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { .. }));
        assert_eq!(meta, before);
    }

    #[test]
    fn failed_rename_leaves_descriptor_untouched() {
        let tmp = TempDir::new().unwrap();
        let (dir, mut meta) = setup(tmp.path());
        let before = meta.clone();
        let staged = Staged::File(StagedFile {
            key: "qemu".into(),
            scratch_path: tmp.path().join("scratch/missing.gz"),
            final_name: "disk.qcow2.gz".into(),
            sha256: "0".repeat(64),
            size: 1,
            effect: RecordEffect::Replace,
        });
        assert!(commit(&dir, &mut meta, staged).is_err());
        assert_eq!(meta, before);
        assert_eq!(BuildDescriptor::load(&dir.path).unwrap(), before);
        assert!(dir.artifact_path("disk.qcow2").exists());
    }
}
