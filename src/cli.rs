use crate::bake::BuildMode;
use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    mode: Option<BuildMode>,
    scripts: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    phase_buffer: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "mode" => overrides.mode = Some(value.parse::<BuildMode>().map_err(|err| anyhow!(err))?),
                "scripts" => overrides.scripts = Some(PathBuf::from(value)),
                "artifacts" | "out" => overrides.artifacts = Some(PathBuf::from(value)),
                "phase-buffer" => overrides.phase_buffer = Some(parse_bool_flag("phase-buffer", &value)?),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --mode, --scripts, --artifacts, --phase-buffer."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            mode: self.mode,
            scripts_dir: self.scripts,
            artifacts_dir: self.artifacts,
            phase_buffer: self.phase_buffer,
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_and_directories() {
        let args = ["bake", "--mode", "record", "--scripts", "scripts", "--out", "baked", "--phase-buffer", "off"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.mode, Some(BuildMode::Record));
        assert_eq!(overrides.scripts_dir, Some(PathBuf::from("scripts")));
        assert_eq!(overrides.artifacts_dir, Some(PathBuf::from("baked")));
        assert_eq!(overrides.phase_buffer, Some(false));
    }

    #[test]
    fn latest_flag_wins() {
        let overrides = CliOverrides::parse(["bake", "--mode", "serve", "--mode", "direct"]).expect("parse");
        assert_eq!(overrides.into_config_overrides().mode, Some(BuildMode::Direct));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["bake", "--mode"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_modes() {
        let err = CliOverrides::parse(["bake", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = CliOverrides::parse(["bake", "--mode", "jit"]).unwrap_err();
        assert!(err.to_string().contains("unknown build mode"), "bad modes should error");
    }
}
