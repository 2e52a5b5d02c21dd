use std::path::Path;

use anyhow::{Context, Result};

use image_postprocess::{BuildDescriptor, BuildStore};

/// Print build history, most recent first, with each directory's images.
pub(crate) fn run_list(workdir: &Path) -> Result<()> {
    let store = BuildStore::open(workdir)?;
    let history = store.history().context("reading build history")?;
    if history.is_empty() {
        println!("no builds");
        return Ok(());
    }

    for summary in history {
        let resolved = match store.resolve(Some(&summary.id)) {
            Ok(resolved) => resolved,
            Err(err) => {
                println!("{} (unavailable: {err})", summary.id);
                continue;
            }
        };
        for dir in resolved.dirs {
            println!("{}", dir.label());
            let descriptor = BuildDescriptor::load(&dir.path)?;
            for (key, rec) in &descriptor.images {
                println!("  {key:<16} {:>12}  {}", rec.size, rec.path);
            }
        }
    }
    Ok(())
}
