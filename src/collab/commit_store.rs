//! Working commit store and the commit-transfer collaborator.
//!
//! The store under `<workdir>/tmp/repo` is a cache. When the commit a build
//! was produced from has been evicted, it is re-materialized from the build's
//! `ostree` artifact (a tarball of an archive-mode repository) before any
//! image is derived from it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::collab::Toolbox;
use crate::error::{PipelineError, Result};
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct CommitStore {
    repo: PathBuf,
}

/// Whether `ensure_commit` had to import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Present,
    Imported,
}

impl CommitStore {
    pub fn new(repo: PathBuf) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn repo_arg(&self) -> String {
        format!("--repo={}", self.repo.display())
    }

    pub fn has_commit(&self, toolbox: &Toolbox, commit: &str) -> Result<bool> {
        if !self.repo.join("config").is_file() {
            return Ok(false);
        }
        let result = Cmd::new(&toolbox.ostree)
            .arg(self.repo_arg())
            .args(["rev-parse", commit])
            .allow_fail()
            .run()?;
        Ok(result.success())
    }

    fn init(&self, toolbox: &Toolbox) -> Result<()> {
        if self.repo.join("config").is_file() {
            return Ok(());
        }
        fs::create_dir_all(&self.repo).map_err(|e| PipelineError::io(&self.repo, e))?;
        Cmd::new(&toolbox.ostree)
            .args(["init", "--mode=archive"])
            .arg(self.repo_arg())
            .error_msg("initializing commit store")
            .run()?;
        Ok(())
    }

    /// Make `commit` available, importing it from `archive` when missing.
    ///
    /// `scratch` receives the unpacked archive and is left behind for
    /// inspection if the import fails.
    pub fn ensure_commit(
        &self,
        toolbox: &Toolbox,
        commit: &str,
        archive: Option<&Path>,
        scratch: &Path,
    ) -> Result<CommitStatus> {
        if self.has_commit(toolbox, commit)? {
            return Ok(CommitStatus::Present);
        }

        let archive = archive.ok_or_else(|| {
            PipelineError::not_found(format!(
                "commit {commit} in '{}' and no 'ostree' artifact to import it from",
                self.repo.display()
            ))
        })?;
        if !archive.is_file() {
            return Err(PipelineError::not_found(archive.display().to_string()));
        }

        log::info!("commit {commit} not in working store; importing from {}", archive.display());
        self.init(toolbox)?;

        let unpacked = scratch.join("commit-import");
        crate::fsops::reset_dir(&unpacked)?;
        Cmd::new(&toolbox.tar)
            .arg("-xf")
            .arg_path(archive)
            .arg("-C")
            .arg_path(&unpacked)
            .error_msg(format!("unpacking '{}'", archive.display()))
            .run()?;
        Cmd::new(&toolbox.ostree)
            .arg(self.repo_arg())
            .arg("pull-local")
            .arg_path(&unpacked)
            .arg(commit)
            .error_msg(format!("importing commit {commit}"))
            .run()?;

        Ok(CommitStatus::Imported)
    }
}
