use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use image_postprocess::build_store::BUILDS_DIRNAME;

/// Nearest ancestor of `start` (itself included) containing `builds/`.
pub(crate) fn locate_workdir(start: &Path) -> Result<PathBuf> {
    let start = start
        .canonicalize()
        .with_context(|| format!("resolving working directory '{}'", start.display()))?;
    for ancestor in start.ancestors() {
        let candidate = Path::new(ancestor);
        if candidate.join(BUILDS_DIRNAME).is_dir() {
            return Ok(candidate.to_path_buf());
        }
    }
    bail!(
        "no '{}' directory in '{}' or any parent; pass --workdir",
        BUILDS_DIRNAME,
        start.display()
    )
}
