use std::fs;
use std::path::{Path, PathBuf};

use kestrel_bake::bake::{ArtifactStore, BuildMode, CookingContext};
use kestrel_bake::config::AppConfig;
use kestrel_bake::host::{EntityHandle, HostObjects};
use kestrel_bake::runner::{self, BOSS_ENTITY};
use kestrel_bake::script::{is_desync, load_pattern};
use kestrel_bake::sm::PhaseClearCause;
use kestrel_bake::tooling::collect_scripts;

const SCRIPTS: &str = "assets/scripts";

fn config(mode: BuildMode, scripts: &Path, artifacts: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.bake.mode = Some(mode);
    cfg.bake.scripts_dir = scripts.to_path_buf();
    cfg.bake.artifacts_dir = artifacts.to_path_buf();
    cfg.sm.frame_time = 1.0 / 60.0;
    cfg
}

fn hosts() -> HostObjects {
    let hosts = HostObjects::new();
    hosts.register_entity(EntityHandle::new(BOSS_ENTITY, glam::DVec2::ZERO));
    hosts
}

#[test]
fn bundled_patterns_compile() {
    let root = PathBuf::from(SCRIPTS);
    let scripts = collect_scripts(&root).expect("collect");
    assert!(scripts.len() >= 2, "expected bundled patterns under {SCRIPTS}");
    let hosts = hosts();
    let mut cook = CookingContext::direct();
    for script in scripts {
        load_pattern(&mut cook, &hosts, &root, &script).unwrap_or_else(|err| panic!("{}: {err:#}", script.display()));
    }
}

#[test]
fn recorded_run_serves_the_same_outcome() {
    let out = tempfile::tempdir().expect("tempdir");
    let root = PathBuf::from(SCRIPTS);

    let direct = runner::run(&config(BuildMode::Direct, &root, out.path())).expect("direct run");
    assert!(direct.failed.is_empty());
    assert!(direct.exported.is_none());

    let recorded = runner::run(&config(BuildMode::Record, &root, out.path())).expect("record run");
    let (units, chunks) = recorded.exported.expect("record mode writes artifacts");
    assert!(units > 0);
    assert_eq!(chunks, 1);

    let served = runner::run(&config(BuildMode::Serve, &root, out.path())).expect("serve run");
    let causes = |summary: &runner::RunSummary| summary.completions.iter().map(|c| c.cause).collect::<Vec<_>>();
    assert_eq!(causes(&served), causes(&direct));
    assert_eq!(causes(&recorded), causes(&direct));
    assert!(causes(&direct).contains(&PhaseClearCause::Timeout));
    assert!(causes(&direct).contains(&PhaseClearCause::Cancelled));
}

#[test]
fn tool_pass_skips_broken_scripts() {
    let scripts = tempfile::tempdir().expect("scripts");
    let out = tempfile::tempdir().expect("out");
    fs::write(
        scripts.path().join("ok.pattern.json"),
        r#"{ "phases": [ { "children": [ { "type": "wait", "expr": "0.25 * 2.0" } ] } ] }"#,
    )
    .expect("write");
    fs::write(
        scripts.path().join("broken.pattern.json"),
        r#"{ "phases": [ { "children": [ { "type": "wait", "expr": "sin(" } ] } ] }"#,
    )
    .expect("write");

    let report = runner::bake(scripts.path(), out.path()).expect("bake");
    assert_eq!(report.baked, vec![scripts.path().join("ok.pattern.json")]);
    assert_eq!(report.failed, vec![scripts.path().join("broken.pattern.json")]);
    assert_eq!(report.units, 1);

    let store = ArtifactStore::open(out.path(), &hosts()).expect("open");
    assert_eq!(store.registry().files.len(), 1);
}

#[test]
fn edited_script_is_reported_as_a_desync() {
    let scripts = tempfile::tempdir().expect("scripts");
    let out = tempfile::tempdir().expect("out");
    let path = scripts.path().join("edit.pattern.json");
    fs::write(&path, r#"{ "phases": [ { "children": [ { "type": "wait", "expr": "1.0" } ] } ] }"#).expect("write");
    runner::bake(scripts.path(), out.path()).expect("bake");

    fs::write(
        &path,
        r#"{ "phases": [ { "children": [
            { "type": "wait", "expr": "1.0" },
            { "type": "emit", "label": "new", "expr": "t" }
        ] } ] }"#,
    )
    .expect("edit");
    let err = runner::run(&config(BuildMode::Serve, scripts.path(), out.path())).expect_err("stale artifacts");
    assert!(is_desync(&err), "{err:#}");
    assert!(format!("{err:#}").contains("not enough baked units"), "{err:#}");
}
