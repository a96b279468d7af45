use std::path::PathBuf;

use anyhow::{bail, Result};
use kestrel_bake::{logging, runner};

fn main() -> Result<()> {
    logging::init();
    let args: Vec<_> = std::env::args().collect();
    let out_dir = args.get(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("assets/baked"));
    let script_root = args.get(2).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("assets/scripts"));
    tracing::info!(scripts = %script_root.display(), out = %out_dir.display(), "baking expressions");
    let report = runner::bake(&script_root, &out_dir)?;
    println!(
        "[bake] {} scripts baked, {} failed, {} units in {} chunks",
        report.baked.len(),
        report.failed.len(),
        report.units,
        report.chunks
    );
    if !report.failed.is_empty() {
        bail!("{} scripts failed to bake", report.failed.len());
    }
    Ok(())
}
