//! Cloud blob upload collaborator.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collab::convert::Platform;
use crate::collab::Toolbox;
use crate::error::Result;
use crate::process::Cmd;

/// Remote destination coordinates for an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub container: String,
    /// Defaults to the local filename.
    pub blob_name: Option<String>,
}

impl UploadTarget {
    pub fn blob_name_for(&self, file: &Path) -> String {
        self.blob_name.clone().unwrap_or_else(|| {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// What gets recorded under the platform's top-level descriptor key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub image: String,
    pub url: String,
}

/// Upload `file` as a blob, returning where it landed.
///
/// The uploader may print the blob URL as its last stdout line; otherwise
/// `<container>/<blob>` is recorded.
pub fn upload_blob(
    toolbox: &Toolbox,
    platform: Platform,
    target: &UploadTarget,
    file: &Path,
) -> Result<UploadRecord> {
    let blob = target.blob_name_for(file);
    let result = Cmd::new(&toolbox.uploader)
        .arg(platform.name())
        .arg("upload-blob")
        .args(["--container", &target.container])
        .args(["--blob-name", &blob])
        .arg("--file")
        .arg_path(file)
        .error_msg(format!("uploading '{}' to {platform}", file.display()))
        .run()?;

    let url = result
        .stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.contains("://"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/{}", target.container, blob));

    Ok(UploadRecord { image: blob, url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn uploader(dir: &Path, body: &str) -> Toolbox {
        let script = dir.join("ore");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        Toolbox {
            uploader: script.display().to_string(),
            ..Toolbox::default()
        }
    }

    #[test]
    fn reported_url_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("img-azure.vhd");
        fs::write(&file, b"vhd").unwrap();
        let tools = uploader(tmp.path(), "echo uploading; echo https://acct.blob/images/x.vhd");
        let target = UploadTarget {
            container: "images".into(),
            blob_name: Some("x.vhd".into()),
        };
        let record = upload_blob(&tools, Platform::Azure, &target, &file).unwrap();
        assert_eq!(record.image, "x.vhd");
        assert_eq!(record.url, "https://acct.blob/images/x.vhd");
    }

    #[test]
    fn default_blob_name_and_url() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("img-azure.vhd");
        fs::write(&file, b"vhd").unwrap();
        let tools = uploader(tmp.path(), "exit 0");
        let target = UploadTarget {
            container: "images".into(),
            blob_name: None,
        };
        let record = upload_blob(&tools, Platform::Azure, &target, &file).unwrap();
        assert_eq!(record.image, "img-azure.vhd");
        assert_eq!(record.url, "images/img-azure.vhd");
    }

    #[test]
    fn failing_uploader_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("img.vhd");
        fs::write(&file, b"vhd").unwrap();
        let tools = uploader(tmp.path(), "echo denied >&2; exit 3");
        let target = UploadTarget {
            container: "images".into(),
            blob_name: None,
        };
        let err = upload_blob(&tools, Platform::Azure, &target, &file).unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
