//! Filesystem primitives the commit sequence is built from.
//!
//! Rename within one filesystem is the only operation treated as atomic.
//! Nothing here ever writes a partial file under its final name.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

/// Streaming sha256 + byte length of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf).map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Move `src` to `dst`, replacing any existing `dst`.
///
/// Across filesystems the bytes are first copied to a sibling temp name of
/// `dst` and then renamed, so `dst` is never observed half-written.
pub fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            let tmp = sibling_tmp(dst);
            fs::copy(src, &tmp).map_err(|e| PipelineError::io(&tmp, e))?;
            File::open(&tmp)
                .and_then(|f| f.sync_all())
                .map_err(|e| PipelineError::io(&tmp, e))?;
            fs::rename(&tmp, dst).map_err(|e| PipelineError::io(dst, e))?;
            fs::remove_file(src).map_err(|e| PipelineError::io(src, e))?;
            Ok(())
        }
        Err(e) => Err(PipelineError::io(dst, e)),
    }
}

const EXDEV: i32 = 18;

fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

/// Serialize `value` and atomically replace `path` with it.
///
/// Writes `<path>.tmp-<pid>` next to the target, syncs it, renames it over
/// the target and syncs the directory. Any failure is a persistence error and
/// leaves the previous file intact.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::not_found(format!("parent of '{}'", path.display())))?;
    let mut payload = serde_json::to_vec_pretty(value).map_err(|e| {
        PipelineError::persistence(path, std::io::Error::new(ErrorKind::InvalidData, e))
    })?;
    payload.push(b'\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!("{file_name}.tmp-{}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(&payload)?;
        f.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_dir(parent)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PipelineError::persistence(path, e)
    })
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// Wipe and recreate a directory.
pub fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(PipelineError::io(dir, e)),
    }
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}
