use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::DVec2;

use crate::bake::{ArtifactStore, BuildMode, CookingContext};
use crate::cli::CliOverrides;
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::host::{EntityHandle, HostObjects};
use crate::script::{is_desync, load_pattern};
use crate::sm::{
    start, CampaignLog, CancelSource, Executor, PatternSM, PhaseCompletion, PhaseProps, PhaseServices, Scheduler,
    SmContext, StateMachine,
};
use crate::tooling::{bake_scripts, collect_scripts, BakeReport};

/// Id of the entity every pattern runs on. Scripts can reach it through `entity("boss")`.
pub const BOSS_ENTITY: &str = "boss";

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub mode: BuildMode,
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub completions: Vec<PhaseCompletion>,
    /// Units and chunks written by a recording run.
    pub exported: Option<(usize, usize)>,
}

/// Loads config from the CLI-selected path, layers env and CLI overrides on it and runs.
pub fn run_with_overrides(cli: CliOverrides) -> Result<RunSummary> {
    let path = cli.config_path().cloned().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = AppConfig::load_or_default(&path);
    config.apply_env()?;
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        tracing::info!(fields = ?overrides.applied_fields(), "applying command line overrides");
    }
    config.apply_overrides(&overrides);
    run(&config)
}

/// Loads every pattern under the configured script directory and plays each one to completion.
/// A desync between scripts and baked artifacts aborts the run; any other script failure only
/// skips that script.
pub fn run(config: &AppConfig) -> Result<RunSummary> {
    let mode = config.build_mode();
    let root = &config.bake.scripts_dir;
    let hosts = HostObjects::new();
    let boss = EntityHandle::new(BOSS_ENTITY, DVec2::ZERO);
    hosts.register_entity(boss.clone());
    let mut cook = match mode {
        BuildMode::Direct => CookingContext::direct(),
        BuildMode::Record => CookingContext::recording(),
        BuildMode::Serve => CookingContext::serving(
            ArtifactStore::open(&config.bake.artifacts_dir, &hosts)
                .with_context(|| format!("Opening baked artifacts in '{}'", config.bake.artifacts_dir.display()))?,
        ),
    };
    tracing::info!(%mode, scripts = %root.display(), "loading patterns");

    let mut summary = RunSummary { mode, ..Default::default() };
    let mut patterns = Vec::new();
    for script in collect_scripts(root)? {
        match load_pattern(&mut cook, &hosts, root, &script) {
            Ok(pattern) => {
                patterns.push(pattern);
                summary.loaded.push(script);
            }
            Err(err) if is_desync(&err) => {
                return Err(err.context("Baked expressions are out of date; rerun bake_expressions"));
            }
            Err(err) => {
                tracing::error!(script = %script.display(), "failed to load pattern: {err:#}");
                summary.failed.push(script);
            }
        }
    }

    for (pattern, script) in patterns.into_iter().zip(&summary.loaded) {
        let completions = play(pattern, &hosts, &boss, config)
            .with_context(|| format!("Running pattern '{}'", script.display()))?;
        summary.completions.extend(completions);
    }

    if let Some(artifacts) = cook.export_all()? {
        artifacts.write_to(&config.bake.artifacts_dir)?;
        summary.exported = Some((artifacts.registry.unit_count(), artifacts.chunks.len()));
    }
    Ok(summary)
}

fn play(
    pattern: PatternSM,
    hosts: &HostObjects,
    boss: &EntityHandle,
    config: &AppConfig,
) -> Result<Vec<PhaseCompletion>> {
    let scheduler = Scheduler::new(config.sm.frame_time);
    let campaign = Rc::new(CampaignLog::default());
    let executor = Executor::new(boss.clone());
    let services = Rc::new(StageServices { hosts: hosts.clone() });
    let ctx = SmContext::new(scheduler.clone(), executor, campaign.clone(), services)
        .with_settings(config.sm.settings());

    let clock = CancelSource::new();
    spawn_timer_clock(&scheduler, hosts.clone(), &clock);
    let root = Rc::new(StateMachine::Pattern(pattern));
    let outcome = scheduler.run_until_complete(start(root, ctx), config.sm.max_frames);
    clock.cancel();
    outcome??;

    let completions = campaign.completions();
    for completion in &completions {
        tracing::info!(
            index = completion.index,
            title = completion.title.as_deref().unwrap_or(""),
            cause = ?completion.cause,
            frames = completion.frames,
            "phase complete"
        );
    }
    Ok(completions)
}

/// Phase hooks for a headless run. Script timers are phase-local: every phase starts them at zero.
struct StageServices {
    hosts: HostObjects,
}

impl PhaseServices for StageServices {
    fn phase_enter(&self, index: usize, props: &PhaseProps) {
        self.hosts.restart_timers();
        tracing::debug!(index, title = props.title.as_deref().unwrap_or(""), "timers restarted");
    }
}

/// Advances host timers once per frame until `stop` is cancelled.
fn spawn_timer_clock(scheduler: &Scheduler, hosts: HostObjects, stop: &CancelSource) {
    let token = stop.token();
    let frames = scheduler.clone();
    scheduler.spawn(async move {
        let dt = frames.frame_time();
        while frames.wait_frames(1, &token).await.is_ok() {
            hosts.advance_timers(dt);
        }
    });
}

/// Records every pattern under `root` into `out_dir` with the same host objects a run uses.
pub fn bake(root: &Path, out_dir: &Path) -> Result<BakeReport> {
    let hosts = HostObjects::new();
    hosts.register_entity(EntityHandle::new(BOSS_ENTITY, DVec2::ZERO));
    bake_scripts(root, out_dir, &hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_a_phase_restarts_script_timers() {
        let hosts = HostObjects::new();
        let orbit = hosts.timer("orbit");
        hosts.advance_timers(2.0);
        let services = StageServices { hosts: hosts.clone() };
        services.phase_enter(1, &PhaseProps::default());
        assert_eq!(orbit.elapsed(), 0.0);
    }
}
