use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::bake::CookingContext;
use crate::host::HostObjects;
use crate::script::{load_pattern, PATTERN_EXTENSION};

/// Pattern files under `root`, sorted so every pass visits them in the same order.
pub fn collect_scripts(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if root.is_file() {
        if is_pattern(root) {
            out.push(root.to_path_buf());
        }
        return Ok(out);
    }
    for entry in std::fs::read_dir(root).with_context(|| format!("Reading '{}'", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(collect_scripts(&path)?);
        } else if is_pattern(&path) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn is_pattern(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.ends_with(PATTERN_EXTENSION))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BakeReport {
    pub baked: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub units: usize,
    pub chunks: usize,
}

/// Records every pattern under `root` and writes the artifacts into `out_dir`. A script that
/// fails to load is logged and skipped; the rest are still baked.
pub fn bake_scripts(root: &Path, out_dir: &Path, hosts: &HostObjects) -> Result<BakeReport> {
    let scripts = collect_scripts(root)?;
    let mut cook = CookingContext::recording();
    let mut report = BakeReport::default();
    for script in scripts {
        match load_pattern(&mut cook, hosts, root, &script) {
            Ok(_) => report.baked.push(script),
            Err(err) => {
                tracing::error!(script = %script.display(), "failed to bake script: {err:#}");
                report.failed.push(script);
            }
        }
    }
    let artifacts = cook.export_all()?.unwrap_or_default();
    artifacts.write_to(out_dir).with_context(|| format!("Writing artifacts to '{}'", out_dir.display()))?;
    report.units = artifacts.registry.unit_count();
    report.chunks = artifacts.chunks.len();
    tracing::info!(
        baked = report.baked.len(),
        failed = report.failed.len(),
        units = report.units,
        chunks = report.chunks,
        "bake finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collects_only_pattern_files_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("stage1")).expect("mkdir");
        fs::write(dir.path().join("b.pattern.json"), "{}").expect("write");
        fs::write(dir.path().join("stage1/a.pattern.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.json"), "{}").expect("write");
        let found = collect_scripts(dir.path()).expect("collect");
        let names: Vec<_> = found.iter().map(|p| p.strip_prefix(dir.path()).expect("under root").to_path_buf()).collect();
        assert_eq!(names, vec![PathBuf::from("b.pattern.json"), PathBuf::from("stage1/a.pattern.json")]);
    }
}
