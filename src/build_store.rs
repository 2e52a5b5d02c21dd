//! Locating build directories under `<workdir>/builds`.
//!
//! `builds.json` holds the build history, most recent first. Two on-disk
//! layouts are understood:
//!
//! ```text
//! builds/<id>/meta.json            legacy single-arch
//! builds/<id>/<arch>/meta.json     multi-arch
//! ```
//!
//! Resolution is read-only and returns explicit handles; nothing here keeps
//! a notion of a "current" build.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::descriptor::{BuildDescriptor, DESCRIPTOR_FILENAME};
use crate::error::{PipelineError, Result};

pub const BUILDS_DIRNAME: &str = "builds";
pub const BUILDS_JSON: &str = "builds.json";
/// Descriptor field naming a legacy build's architecture.
pub const BASEARCH_FIELD: &str = "coreos-assembler.basearch";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum HistoryEntry {
    Id(String),
    Detailed {
        id: String,
        #[serde(default)]
        arches: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct BuildsJson {
    #[serde(default)]
    builds: Vec<HistoryEntry>,
}

/// One build in history order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub id: String,
    pub arches: Vec<String>,
}

/// Directory layout of a resolved build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Legacy,
    MultiArch,
}

/// Concrete handle to one directory holding a descriptor and its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDir {
    pub build_id: String,
    pub arch: Option<String>,
    pub path: PathBuf,
}

impl BuildDir {
    pub fn descriptor_path(&self) -> PathBuf {
        self.path.join(DESCRIPTOR_FILENAME)
    }

    pub fn artifact_path(&self, rel: &str) -> PathBuf {
        self.path.join(rel)
    }

    /// `<id>` or `<id>/<arch>`, for log lines.
    pub fn label(&self) -> String {
        match &self.arch {
            Some(arch) => format!("{}/{}", self.build_id, arch),
            None => self.build_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBuild {
    pub id: String,
    pub layout: Layout,
    pub dirs: Vec<BuildDir>,
}

impl ResolvedBuild {
    /// Keep only the directory for `arch`.
    ///
    /// A legacy build has no arch directory; it is kept when its descriptor
    /// records `coreos-assembler.basearch` equal to `arch`, or records none.
    pub fn only_arch(mut self, arch: &str) -> Result<Self> {
        let mut kept = Vec::with_capacity(self.dirs.len());
        for dir in self.dirs {
            let matches = match &dir.arch {
                Some(a) => a == arch,
                None => match legacy_basearch(&dir)? {
                    Some(recorded) => recorded == arch,
                    None => true,
                },
            };
            if matches {
                kept.push(dir);
            }
        }
        self.dirs = kept;
        if self.dirs.is_empty() {
            return Err(PipelineError::not_found(format!(
                "architecture '{}' in build '{}'",
                arch, self.id
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct BuildStore {
    builds_dir: PathBuf,
}

impl BuildStore {
    pub fn open(workdir: &Path) -> Result<Self> {
        let builds_dir = workdir.join(BUILDS_DIRNAME);
        if !builds_dir.is_dir() {
            return Err(PipelineError::not_found(format!(
                "builds directory '{}'",
                builds_dir.display()
            )));
        }
        Ok(Self { builds_dir })
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    /// Build history, most recent first. A missing `builds.json` is empty history.
    pub fn history(&self) -> Result<Vec<BuildSummary>> {
        let path = self.builds_dir.join(BUILDS_JSON);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        let parsed: BuildsJson = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Parse {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(parsed
            .builds
            .into_iter()
            .map(|entry| match entry {
                HistoryEntry::Id(id) => BuildSummary {
                    id,
                    arches: Vec::new(),
                },
                HistoryEntry::Detailed { id, arches } => BuildSummary { id, arches },
            })
            .collect())
    }

    pub fn latest(&self) -> Result<BuildSummary> {
        self.history()?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::not_found(format!(
                "any build in '{}'",
                self.builds_dir.display()
            )))
    }

    /// Resolve `build` (or the latest build) to concrete directories.
    pub fn resolve(&self, build: Option<&str>) -> Result<ResolvedBuild> {
        let summary = match build {
            None => self.latest()?,
            Some(id) => {
                validate_build_id(id)?;
                self.history()?
                    .into_iter()
                    .find(|b| b.id == id)
                    .unwrap_or_else(|| BuildSummary {
                        id: id.to_string(),
                        arches: Vec::new(),
                    })
            }
        };
        self.resolve_summary(&summary)
    }

    fn resolve_summary(&self, summary: &BuildSummary) -> Result<ResolvedBuild> {
        let root = self.builds_dir.join(&summary.id);
        if !root.is_dir() {
            return Err(PipelineError::not_found(format!("build '{}'", summary.id)));
        }

        if root.join(DESCRIPTOR_FILENAME).is_file() {
            return Ok(ResolvedBuild {
                id: summary.id.clone(),
                layout: Layout::Legacy,
                dirs: vec![BuildDir {
                    build_id: summary.id.clone(),
                    arch: None,
                    path: root,
                }],
            });
        }

        let arches = if summary.arches.is_empty() {
            scan_arch_dirs(&root)?
        } else {
            summary.arches.clone()
        };

        let mut dirs = Vec::new();
        for arch in arches {
            let path = root.join(&arch);
            if !path.join(DESCRIPTOR_FILENAME).is_file() {
                return Err(PipelineError::not_found(format!(
                    "descriptor for build '{}' arch '{}'",
                    summary.id, arch
                )));
            }
            dirs.push(BuildDir {
                build_id: summary.id.clone(),
                arch: Some(arch),
                path,
            });
        }

        if dirs.is_empty() {
            return Err(PipelineError::not_found(format!(
                "descriptor for build '{}'",
                summary.id
            )));
        }

        Ok(ResolvedBuild {
            id: summary.id.clone(),
            layout: Layout::MultiArch,
            dirs,
        })
    }
}

fn legacy_basearch(dir: &BuildDir) -> Result<Option<String>> {
    let descriptor = BuildDescriptor::load(&dir.path)?;
    Ok(descriptor
        .extra_field(BASEARCH_FIELD)
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

fn scan_arch_dirs(root: &Path) -> Result<Vec<String>> {
    let mut arches = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| PipelineError::io(root, e))? {
        let entry = entry.map_err(|e| PipelineError::io(root, e))?;
        let path = entry.path();
        if !path.join(DESCRIPTOR_FILENAME).is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            arches.push(name.to_string());
        }
    }
    arches.sort();
    Ok(arches)
}

fn validate_build_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(PipelineError::not_found(format!("build '{id}'")));
    }
    Ok(())
}
