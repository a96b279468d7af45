use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bake::BuildMode;
use crate::sm::SmSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/bake.json";
pub const BAKE_MODE_ENV: &str = "KESTREL_BAKE_MODE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakeConfig {
    /// Unset falls back to the mode picked by cargo features.
    #[serde(default)]
    pub mode: Option<BuildMode>,
    #[serde(default = "BakeConfig::default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "BakeConfig::default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmConfig {
    #[serde(default = "SmConfig::default_frame_time")]
    pub frame_time: f64,
    #[serde(default = "SmConfig::default_phase_buffer")]
    pub phase_buffer: bool,
    #[serde(default = "SmConfig::default_phase_buffer_frames")]
    pub phase_buffer_frames: u64,
    #[serde(default = "SmConfig::default_max_frames")]
    pub max_frames: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bake: BakeConfig,
    #[serde(default)]
    pub sm: SmConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfigOverrides {
    pub mode: Option<BuildMode>,
    pub scripts_dir: Option<PathBuf>,
    pub artifacts_dir: Option<PathBuf>,
    pub phase_buffer: Option<bool>,
}

impl BakeConfig {
    fn default_scripts_dir() -> PathBuf {
        PathBuf::from("assets/scripts")
    }

    fn default_artifacts_dir() -> PathBuf {
        PathBuf::from("assets/baked")
    }
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self { mode: None, scripts_dir: Self::default_scripts_dir(), artifacts_dir: Self::default_artifacts_dir() }
    }
}

impl SmConfig {
    fn default_frame_time() -> f64 {
        1.0 / 120.0
    }

    const fn default_phase_buffer() -> bool {
        true
    }

    const fn default_phase_buffer_frames() -> u64 {
        2
    }

    const fn default_max_frames() -> u64 {
        120 * 60 * 10
    }

    pub fn settings(&self) -> SmSettings {
        SmSettings { phase_buffer_frames: if self.phase_buffer { self.phase_buffer_frames } else { 0 } }
    }
}

impl Default for SmConfig {
    fn default() -> Self {
        Self {
            frame_time: Self::default_frame_time(),
            phase_buffer: Self::default_phase_buffer(),
            phase_buffer_frames: Self::default_phase_buffer_frames(),
            max_frames: Self::default_max_frames(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        if cfg.sm.frame_time.is_nan() || cfg.sm.frame_time <= 0.0 {
            return Err(anyhow!("frame_time must be positive in {}", path.display()));
        }
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!("Config load error: {err:#}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    /// Applies the build mode named by `value`, usually read from `KESTREL_BAKE_MODE`.
    pub fn apply_env_mode(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            let mode = value.parse::<BuildMode>().map_err(|err| anyhow!("{BAKE_MODE_ENV}: {err}"))?;
            self.bake.mode = Some(mode);
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<()> {
        let value = std::env::var(BAKE_MODE_ENV).ok();
        self.apply_env_mode(value.as_deref())
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(mode) = overrides.mode {
            self.bake.mode = Some(mode);
        }
        if let Some(dir) = &overrides.scripts_dir {
            self.bake.scripts_dir = dir.clone();
        }
        if let Some(dir) = &overrides.artifacts_dir {
            self.bake.artifacts_dir = dir.clone();
        }
        if let Some(enabled) = overrides.phase_buffer {
            self.sm.phase_buffer = enabled;
        }
    }

    pub fn build_mode(&self) -> BuildMode {
        self.bake.mode.unwrap_or_else(BuildMode::compiled_default)
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.mode.is_some() {
            fields.push("mode");
        }
        if self.scripts_dir.is_some() {
            fields.push("scripts");
        }
        if self.artifacts_dir.is_some() {
            fields.push("artifacts");
        }
        if self.phase_buffer.is_some() {
            fields.push("phase_buffer");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{ "bake": { "mode": "serve" } }"#).expect("config");
        assert_eq!(cfg.build_mode(), BuildMode::Serve);
        assert_eq!(cfg.bake.scripts_dir, PathBuf::from("assets/scripts"));
        assert_eq!(cfg.sm.settings().phase_buffer_frames, 2);
    }

    #[test]
    fn env_then_cli_override_the_file() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_mode(Some("record")).expect("env mode");
        assert_eq!(cfg.build_mode(), BuildMode::Record);
        cfg.apply_overrides(&AppConfigOverrides {
            mode: Some(BuildMode::Direct),
            phase_buffer: Some(false),
            ..Default::default()
        });
        assert_eq!(cfg.build_mode(), BuildMode::Direct);
        assert_eq!(cfg.sm.settings().phase_buffer_frames, 0);
        assert!(cfg.apply_env_mode(Some("turbo")).is_err());
        cfg.apply_env_mode(None).expect("unset env is ignored");
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bake.json");
        fs::write(&path, "{ not json").expect("write");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bake.json"));
        fs::write(&path, r#"{ "sm": { "frame_time": 0 } }"#).expect("write");
        assert!(AppConfig::load(&path).is_err());
    }
}
