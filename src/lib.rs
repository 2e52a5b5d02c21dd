//! Post-processing of finished OS disk image builds.
//!
//! A build directory holds a descriptor (`meta.json`) and the artifacts it
//! records. This crate applies transforms to those artifacts in place:
//! compress, decompress, derive a cloud-platform image, upload one.
//!
//! - **Build store** - resolve a build (latest by default) to its directories
//! - **Descriptor** - typed, order-preserving view over `meta.json`
//! - **Transforms** - skip checks plus staging through external tools
//! - **Commit** - rename into place, persist the descriptor, clean up
//!
//! # Architecture
//!
//! ```text
//! pipeline::run_build
//!     │
//!     ├── build_store: builds/<id>[/<arch>]/meta.json
//!     ├── transform::skip     already done?  (checksum verified)
//!     ├── transform::runner   stage in tmp/<job> via collab::*
//!     └── commit              rename → save meta.json → remove superseded
//! ```
//!
//! Every step leaves the build directory in a state where the descriptor
//! matches the files on disk, so an interrupted run converges when re-run.

pub mod artifact;
pub mod build_store;
pub mod collab;
pub mod commit;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fsops;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod resources;
pub mod transform;

pub use artifact::ArtifactRecord;
pub use build_store::{BuildDir, BuildStore, ResolvedBuild};
pub use collab::compress::Compression;
pub use collab::convert::Platform;
pub use collab::upload::UploadTarget;
pub use collab::Toolbox;
pub use config::Config;
pub use descriptor::BuildDescriptor;
pub use error::{PipelineError, Result};
pub use pipeline::{run_build, Job, Pipeline, RunReport};
