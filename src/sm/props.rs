use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    #[default]
    NonSpell,
    Spell,
    Timeout,
    Final,
    Dialogue,
}

impl PhaseType {
    /// Spell-like phases each cost the boss a life.
    pub fn is_spell(self) -> bool {
        matches!(self, PhaseType::Spell | PhaseType::Timeout | PhaseType::Final)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossConfig {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternProps {
    pub boss: Option<BossConfig>,
    /// Track per phase index; shorter lists leave later phases untouched.
    pub bgms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseProps {
    pub title: Option<String>,
    pub phase_type: Option<PhaseType>,
    /// HP granted to the executor at phase start. Zero leaves HP alone and disables HP clears.
    pub hp: f64,
    /// Seconds before the phase times out. Zero disables the timeout.
    pub timeout: f64,
    pub skip: bool,
    /// Keep the phase running after its children finish until it is cancelled or times out.
    pub hold: bool,
    pub lenient: bool,
    pub cutin: bool,
    pub autocull: bool,
    pub boss: Option<BossConfig>,
}

impl PhaseProps {
    pub fn inherit(&mut self, pattern: &PatternProps) {
        if self.boss.is_none() {
            self.boss = pattern.boss.clone();
        }
    }

    pub fn is_spell(&self) -> bool {
        self.phase_type.is_some_and(PhaseType::is_spell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_props_default_missing_fields() {
        let props: PhaseProps =
            serde_json::from_str(r#"{ "title": "Sign", "phase_type": "spell", "timeout": 30 }"#).expect("props");
        assert_eq!(props.title.as_deref(), Some("Sign"));
        assert!(props.is_spell());
        assert_eq!(props.hp, 0.0);
        assert!(!props.hold);
    }

    #[test]
    fn phases_inherit_the_pattern_boss() {
        let pattern = PatternProps { boss: Some(BossConfig { key: "simp".into(), name: "Simp".into() }), bgms: vec![] };
        let mut own = PhaseProps { boss: Some(BossConfig { key: "other".into(), name: String::new() }), ..Default::default() };
        let mut plain = PhaseProps::default();
        own.inherit(&pattern);
        plain.inherit(&pattern);
        assert_eq!(own.boss.map(|b| b.key), Some("other".to_string()));
        assert_eq!(plain.boss, pattern.boss);
    }
}
