//! image-postprocess - post-process OS disk image builds in place
//!
//! Compresses, decompresses, derives cloud-platform images from and uploads
//! the artifacts of a build under `<workdir>/builds`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod workflows;

#[derive(Parser)]
#[command(name = "image-postprocess")]
#[command(about = "Post-process OS disk image builds in place")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Working directory containing builds/ (searched upwards)
    #[arg(long, global = true, env = "IMAGE_POSTPROCESS_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compress build images
    Compress(workflows::CompressArgs),
    /// Restore compressed build images
    Decompress(workflows::DecompressArgs),
    /// Derive a cloud-platform image from the qemu image
    Buildextend(workflows::BuildExtendArgs),
    /// Upload a platform image and record where it went
    Upload(workflows::UploadArgs),
    /// List builds and their images
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    image_postprocess::logging::init_logging(cli.debug);

    let workdir = workflows::locate_workdir(&cli.workdir)?;
    log::debug!("working directory: {}", workdir.display());

    match cli.command {
        Command::Compress(args) => workflows::run_compress(&workdir, args),
        Command::Decompress(args) => workflows::run_decompress(&workdir, args),
        Command::Buildextend(args) => workflows::run_buildextend(&workdir, args),
        Command::Upload(args) => workflows::run_upload(&workdir, args),
        Command::List => workflows::run_list(&workdir),
    }
}
