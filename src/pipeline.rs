//! Job driver: expand a job into steps and run them against one build directory.
//!
//! A step is run only when its skip check says the work is not already done,
//! and every applied step is committed (and the descriptor persisted) before
//! the next one starts. Processing stops at the first error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::build_store::{BuildDir, BuildStore};
use crate::collab::commit_store::CommitStore;
use crate::collab::compress::Compression;
use crate::collab::convert::Platform;
use crate::collab::upload::UploadTarget;
use crate::collab::Toolbox;
use crate::commit::commit;
use crate::descriptor::BuildDescriptor;
use crate::error::{PipelineError, Result};
use crate::fsops::{remove_file_if_exists, reset_dir};
use crate::resources::cpu_quota_threads;
use crate::transform::runner::TransformRunner;
use crate::transform::skip::{self, SkipDecision};
use crate::transform::{Step, Transform, NEVER_COMPRESS};

/// Scratch space root under the working directory.
pub const SCRATCH_DIRNAME: &str = "tmp";
/// Working commit store under the scratch root.
pub const COMMIT_STORE_DIRNAME: &str = "repo";

/// A user-level request, expanded per build directory into [`Step`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Compress {
        algorithm: Compression,
        fast: bool,
        /// Explicit image keys; empty means every eligible image.
        artifacts: Vec<String>,
    },
    Decompress {
        artifacts: Vec<String>,
    },
    BuildExtend {
        platform: Platform,
        upload: Option<UploadTarget>,
    },
    Upload {
        platform: Platform,
        target: UploadTarget,
    },
}

impl Job {
    /// Name of the job's scratch directory.
    pub fn name(&self) -> String {
        match self {
            Self::Compress { .. } => "compress".into(),
            Self::Decompress { .. } => "decompress".into(),
            Self::BuildExtend { platform, .. } => format!("buildextend-{platform}"),
            Self::Upload { platform, .. } => format!("upload-{platform}"),
        }
    }

    /// Expand into concrete steps for one descriptor.
    pub fn steps(&self, descriptor: &BuildDescriptor) -> Result<Vec<Step>> {
        match self {
            Self::Compress {
                algorithm,
                fast,
                artifacts,
            } => {
                let transform = Transform::Compress {
                    algorithm: *algorithm,
                    fast: *fast,
                };
                Ok(select(descriptor, artifacts)?
                    .into_iter()
                    .map(|key| Step::new(key, transform.clone()))
                    .collect())
            }
            Self::Decompress { artifacts } => Ok(select(descriptor, artifacts)?
                .into_iter()
                .map(|key| Step::new(key, Transform::Decompress))
                .collect()),
            Self::BuildExtend { platform, upload } => {
                let mut steps = vec![Step::new(
                    platform.name(),
                    Transform::DerivePlatform {
                        platform: *platform,
                    },
                )];
                if let Some(target) = upload {
                    steps.push(Step::new(
                        platform.name(),
                        Transform::Upload {
                            platform: *platform,
                            target: target.clone(),
                        },
                    ));
                }
                Ok(steps)
            }
            Self::Upload { platform, target } => Ok(vec![Step::new(
                platform.name(),
                Transform::Upload {
                    platform: *platform,
                    target: target.clone(),
                },
            )]),
        }
    }
}

/// Image keys a (de)compression job applies to.
///
/// Without an explicit list, every image not on the never-compress list and
/// not flagged `skip-compression`. An explicit list overrides the former but
/// not the latter, and every listed key must exist.
fn select(descriptor: &BuildDescriptor, artifacts: &[String]) -> Result<Vec<String>> {
    if artifacts.is_empty() {
        return Ok(descriptor
            .images
            .iter()
            .filter(|(key, rec)| !NEVER_COMPRESS.contains(&key.as_str()) && !rec.skip_compression())
            .map(|(key, _)| key.clone())
            .collect());
    }

    let mut keys = Vec::new();
    for key in artifacts {
        let rec = descriptor.image(key).ok_or_else(|| {
            PipelineError::not_found(format!("image '{key}' in build {}", descriptor.build_id))
        })?;
        if rec.skip_compression() {
            log::info!("skipping '{key}': marked skip-compression");
            continue;
        }
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    Ok(keys)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Committed,
    AlreadyDone,
}

/// What a run did to one build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub build: String,
    pub changed: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

pub struct Pipeline {
    toolbox: Toolbox,
    scratch: PathBuf,
    commit_store: CommitStore,
    threads: Option<u32>,
}

impl Pipeline {
    /// Pipeline using `<workdir>/tmp/<job_name>` as scratch space.
    pub fn new(workdir: &Path, job_name: &str, toolbox: Toolbox) -> Self {
        let scratch_root = workdir.join(SCRATCH_DIRNAME);
        Self {
            toolbox,
            scratch: scratch_root.join(job_name),
            commit_store: CommitStore::new(scratch_root.join(COMMIT_STORE_DIRNAME)),
            threads: cpu_quota_threads(),
        }
    }

    pub fn with_threads(mut self, threads: Option<u32>) -> Self {
        self.threads = threads;
        self
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Wipe scratch space left over from a previous run.
    pub fn reset_scratch(&self) -> Result<()> {
        reset_dir(&self.scratch)
    }

    /// Apply `job` to one build directory.
    pub fn run(&self, dir: &BuildDir, job: &Job, force: bool) -> Result<RunReport> {
        let descriptor = BuildDescriptor::load(&dir.path)?;
        let steps = job.steps(&descriptor)?;
        self.run_steps(dir, &steps, force)
    }

    /// Apply explicit `steps` in order, reloading the descriptor first.
    ///
    /// Every collaborator the steps may call must resolve on this host before
    /// the first step runs.
    pub fn run_steps(&self, dir: &BuildDir, steps: &[Step], force: bool) -> Result<RunReport> {
        let mut descriptor = BuildDescriptor::load(&dir.path)?;
        self.toolbox
            .check(&required_programs(steps, &descriptor, &self.toolbox))?;
        fs::create_dir_all(&self.scratch).map_err(|e| PipelineError::io(&self.scratch, e))?;
        let runner = TransformRunner::new(
            &self.toolbox,
            &self.scratch,
            self.threads,
            &self.commit_store,
        );

        let mut report = RunReport {
            build: dir.label(),
            changed: Vec::new(),
            skipped: Vec::new(),
        };
        for step in steps {
            let outcome = self.run_step(&runner, dir, &mut descriptor, step, force)?;
            let list = match outcome {
                StepOutcome::Committed => &mut report.changed,
                StepOutcome::AlreadyDone => &mut report.skipped,
            };
            if !list.contains(&step.key) {
                list.push(step.key.clone());
            }
        }
        Ok(report)
    }

    fn run_step(
        &self,
        runner: &TransformRunner<'_>,
        dir: &BuildDir,
        descriptor: &mut BuildDescriptor,
        step: &Step,
        force: bool,
    ) -> Result<StepOutcome> {
        match skip::evaluate(step, descriptor, dir, force)? {
            SkipDecision::AlreadyDone { strays } => {
                for stray in strays {
                    if remove_file_if_exists(&stray)? {
                        log::info!("{}: removed leftover {}", dir.label(), stray.display());
                    }
                }
                log::info!(
                    "{}: '{}' already {}",
                    dir.label(),
                    step.key,
                    step.transform.done_verb()
                );
                Ok(StepOutcome::AlreadyDone)
            }
            SkipDecision::Run => {
                let staged = runner.stage(dir, descriptor, step)?;
                commit(dir, descriptor, staged)?;
                log::info!(
                    "{}: '{}' {}",
                    dir.label(),
                    step.key,
                    step.transform.done_verb()
                );
                Ok(StepOutcome::Committed)
            }
        }
    }
}

/// Collaborator programs `steps` may invoke against `descriptor`.
pub fn required_programs<'t>(
    steps: &[Step],
    descriptor: &BuildDescriptor,
    toolbox: &'t Toolbox,
) -> Vec<&'t str> {
    let mut programs: Vec<&'t str> = Vec::new();
    for step in steps {
        match &step.transform {
            Transform::Compress { algorithm, .. } => programs.push(algorithm.program(toolbox)),
            Transform::Decompress => {
                let algorithm = descriptor
                    .image(&step.key)
                    .and_then(|rec| Compression::from_path(&rec.path));
                if let Some(algorithm) = algorithm {
                    programs.push(algorithm.program(toolbox));
                }
            }
            Transform::DerivePlatform { platform } => {
                programs.push(&toolbox.platform_tag);
                if platform.format().format != "qcow2" {
                    programs.push(&toolbox.qemu_img);
                }
                if descriptor.ostree_commit.is_some() {
                    programs.push(&toolbox.ostree);
                    programs.push(&toolbox.tar);
                }
            }
            Transform::Upload { .. } => programs.push(&toolbox.uploader),
        }
    }
    let mut seen = Vec::with_capacity(programs.len());
    programs.retain(|p| {
        let first = !seen.contains(p);
        seen.push(*p);
        first
    });
    programs
}

/// Resolve `build` (latest when `None`), optionally narrow to `arch`, and run
/// `job` over every resulting directory with one freshly wiped scratch space.
pub fn run_build(
    workdir: &Path,
    build: Option<&str>,
    arch: Option<&str>,
    job: &Job,
    force: bool,
    toolbox: Toolbox,
) -> Result<Vec<RunReport>> {
    let store = BuildStore::open(workdir)?;
    let mut resolved = store.resolve(build)?;
    if let Some(arch) = arch {
        resolved = resolved.only_arch(arch)?;
    }

    let pipeline = Pipeline::new(workdir, &job.name(), toolbox);
    pipeline.reset_scratch()?;

    let mut reports = Vec::with_capacity(resolved.dirs.len());
    for dir in &resolved.dirs {
        reports.push(pipeline.run(dir, job, force)?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRecord;

    fn descriptor() -> BuildDescriptor {
        let mut meta = BuildDescriptor::new("1");
        for (key, path) in [
            ("qemu", "disk.qcow2"),
            ("metal", "disk.raw"),
            ("ostree", "commit.tar"),
            ("live-iso", "live.iso"),
        ] {
            meta.insert_image(key, ArtifactRecord::new(path, "0", 0));
        }
        let mut aws = ArtifactRecord::new("disk.vmdk", "0", 0);
        aws.extra
            .insert("skip-compression".into(), serde_json::Value::Bool(true));
        meta.insert_image("aws", aws);
        meta
    }

    fn keys(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.key.as_str()).collect()
    }

    #[test]
    fn default_selection_excludes_never_compress_and_flagged() {
        let job = Job::Compress {
            algorithm: Compression::Gzip,
            fast: false,
            artifacts: vec![],
        };
        let steps = job.steps(&descriptor()).unwrap();
        assert_eq!(keys(&steps), vec!["metal", "qemu"]);
    }

    #[test]
    fn explicit_selection_overrides_never_compress_only() {
        let job = Job::Decompress {
            artifacts: vec!["live-iso".into(), "aws".into(), "live-iso".into()],
        };
        let steps = job.steps(&descriptor()).unwrap();
        assert_eq!(keys(&steps), vec!["live-iso"]);
    }

    #[test]
    fn unknown_explicit_artifact_is_not_found() {
        let job = Job::Decompress {
            artifacts: vec!["vmware".into()],
        };
        assert!(job.steps(&descriptor()).unwrap_err().is_not_found());
    }

    #[test]
    fn required_programs_follow_steps_and_descriptor() {
        let toolbox = Toolbox::default();
        let mut meta = descriptor();
        meta.insert_image("metal", ArtifactRecord::new("disk.raw.xz", "0", 0));

        let decompress = Job::Decompress { artifacts: vec![] }.steps(&meta).unwrap();
        assert_eq!(required_programs(&decompress, &meta, &toolbox), vec!["xz"]);

        let extend = Job::BuildExtend {
            platform: Platform::Azure,
            upload: Some(UploadTarget {
                container: "c".into(),
                blob_name: None,
            }),
        }
        .steps(&meta)
        .unwrap();
        assert_eq!(
            required_programs(&extend, &meta, &toolbox),
            vec!["gf-platformid", "qemu-img", "ore"]
        );

        meta.ostree_commit = Some("c0ffee".into());
        let openstack = Job::BuildExtend {
            platform: Platform::OpenStack,
            upload: None,
        }
        .steps(&meta)
        .unwrap();
        assert_eq!(
            required_programs(&openstack, &meta, &toolbox),
            vec!["gf-platformid", "ostree", "tar"]
        );
    }

    #[test]
    fn buildextend_with_upload_is_two_steps() {
        let job = Job::BuildExtend {
            platform: Platform::Azure,
            upload: Some(UploadTarget {
                container: "c".into(),
                blob_name: None,
            }),
        };
        let steps = job.steps(&descriptor()).unwrap();
        assert_eq!(keys(&steps), vec!["azure", "azure"]);
        assert!(matches!(steps[1].transform, Transform::Upload { .. }));
        assert_eq!(job.name(), "buildextend-azure");
    }
}
