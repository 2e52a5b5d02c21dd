use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use image_postprocess::{
    run_build, Compression, Config, Job, Platform, RunReport, Toolbox, UploadTarget,
};

/// Which build (and architecture) to operate on.
#[derive(Args, Debug)]
pub(crate) struct BuildSelect {
    /// Build ID (default: latest)
    #[arg(long)]
    build: Option<String>,

    /// Only this architecture of a multi-arch build
    #[arg(long)]
    arch: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct CompressArgs {
    #[command(flatten)]
    select: BuildSelect,

    /// Compression algorithm (default from image-postprocess.toml, else gzip)
    #[arg(long)]
    compressor: Option<Compression>,

    /// Trade compression ratio for speed
    #[arg(long)]
    fast: bool,

    /// Only these image keys (repeatable; overrides the never-compress list)
    #[arg(long = "artifact")]
    artifacts: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct DecompressArgs {
    #[command(flatten)]
    select: BuildSelect,

    /// Only these image keys (repeatable)
    #[arg(long = "artifact")]
    artifacts: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct BuildExtendArgs {
    /// Target platform
    platform: Platform,

    #[command(flatten)]
    select: BuildSelect,

    /// Rebuild even if the image already exists
    #[arg(long)]
    force: bool,

    /// Upload the image after building it
    #[arg(long, requires = "container")]
    upload: bool,

    /// Destination container for --upload
    #[arg(long)]
    container: Option<String>,

    /// Blob name (default: the image filename)
    #[arg(long)]
    blob_name: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct UploadArgs {
    /// Platform whose image to upload
    platform: Platform,

    #[command(flatten)]
    select: BuildSelect,

    /// Destination container
    #[arg(long)]
    container: String,

    /// Blob name (default: the image filename)
    #[arg(long)]
    blob_name: Option<String>,

    /// Upload again even if already recorded
    #[arg(long)]
    force: bool,
}

pub(crate) fn run_compress(workdir: &Path, args: CompressArgs) -> Result<()> {
    let config = load_config(workdir)?;
    let algorithm = args.compressor.unwrap_or(config.compress.algorithm);
    let job = Job::Compress {
        algorithm,
        fast: args.fast,
        artifacts: args.artifacts,
    };
    execute(workdir, &args.select, &job, false, config.tools)
}

pub(crate) fn run_decompress(workdir: &Path, args: DecompressArgs) -> Result<()> {
    let config = load_config(workdir)?;
    let job = Job::Decompress {
        artifacts: args.artifacts,
    };
    execute(workdir, &args.select, &job, false, config.tools)
}

pub(crate) fn run_buildextend(workdir: &Path, args: BuildExtendArgs) -> Result<()> {
    let config = load_config(workdir)?;
    let upload = match (args.upload, args.container) {
        (true, Some(container)) => Some(UploadTarget {
            container,
            blob_name: args.blob_name,
        }),
        (true, None) => bail!("--upload requires --container"),
        (false, _) => None,
    };

    let job = Job::BuildExtend {
        platform: args.platform,
        upload,
    };
    execute(workdir, &args.select, &job, args.force, config.tools)
}

pub(crate) fn run_upload(workdir: &Path, args: UploadArgs) -> Result<()> {
    let config = load_config(workdir)?;
    let job = Job::Upload {
        platform: args.platform,
        target: UploadTarget {
            container: args.container,
            blob_name: args.blob_name,
        },
    };
    execute(workdir, &args.select, &job, args.force, config.tools)
}

fn load_config(workdir: &Path) -> Result<Config> {
    Config::load(workdir).with_context(|| format!("loading configuration in '{}'", workdir.display()))
}

fn execute(
    workdir: &Path,
    select: &BuildSelect,
    job: &Job,
    force: bool,
    tools: Toolbox,
) -> Result<()> {
    let reports = run_build(
        workdir,
        select.build.as_deref(),
        select.arch.as_deref(),
        job,
        force,
        tools,
    )
    .with_context(|| format!("{} failed", job.name()))?;
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.is_noop() {
        println!("{}: already up to date", report.build);
    } else {
        println!("{}: updated {}", report.build, report.changed.join(", "));
    }
}
