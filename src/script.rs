use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bake::{BakeError, CompileSiteKind, CookingContext};
use crate::expr::{compile_source, Callable, CompileError, Param, ValueType};
use crate::host::HostObjects;
use crate::sm::{Leaf, ParallelSM, PatternProps, PatternSM, PhaseProps, PhaseSM, SequentialSM, StateMachine};

/// Extension the loader and the bake tool look for.
pub const PATTERN_EXTENSION: &str = "pattern.json";

#[derive(Debug, Clone, Deserialize)]
pub struct PatternDoc {
    #[serde(default)]
    pub pattern: PatternProps,
    #[serde(default)]
    pub phases: Vec<PhaseDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseDoc {
    #[serde(default)]
    pub props: PhaseProps,
    #[serde(default)]
    pub children: Vec<NodeDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDoc {
    Action {
        #[serde(default)]
        wait: f64,
        #[serde(default = "default_blocking")]
        blocking: bool,
        #[serde(default)]
        children: Vec<NodeDoc>,
    },
    Saction {
        #[serde(default)]
        wait: f64,
        #[serde(default)]
        children: Vec<NodeDoc>,
    },
    End {
        #[serde(default)]
        children: Vec<NodeDoc>,
    },
    Finish {
        child: Box<NodeDoc>,
    },
    Wait {
        expr: String,
    },
    WaitUntil {
        expr: String,
    },
    Emit {
        label: String,
        expr: String,
    },
    ShiftPhase,
}

fn default_blocking() -> bool {
    true
}

/// Loads a pattern file. Its expressions are compiled in a script-dump context keyed by the
/// path relative to `root`, so a recording pass and a serving pass agree on its identity.
pub fn load_pattern(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    root: &Path,
    path: &Path,
) -> Result<PatternSM> {
    let text = fs::read_to_string(path).with_context(|| format!("Reading '{}'", path.display()))?;
    let key = path.strip_prefix(root).unwrap_or(path);
    load_pattern_str(cook, hosts, key, &text).with_context(|| format!("Loading pattern '{}'", path.display()))
}

/// Loads a pattern from JSON text under the given identity key.
pub fn load_pattern_str(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    key: &Path,
    text: &str,
) -> Result<PatternSM> {
    let doc: PatternDoc = serde_json::from_str(text).context("Parsing pattern document")?;
    let mut guard = cook.open_context(CompileSiteKind::ScriptDump, key)?;
    let built = {
        let mut builder = Builder { cook: &mut *guard, hosts, params: Leaf::params() };
        builder.pattern(doc)
    };
    match built {
        Ok(pattern) => {
            guard.close()?;
            Ok(pattern)
        }
        Err(err) => {
            if let Err(close) = guard.discard() {
                tracing::error!(%close, "failed to close script context after load error");
            }
            Err(err)
        }
    }
}

/// True when `err` was caused by the baked artifacts disagreeing with the scripts.
pub fn is_desync(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<BakeError>().is_some_and(BakeError::is_desync)
            || cause.downcast_ref::<CompileError>().is_some_and(CompileError::is_desync)
    })
}

struct Builder<'a> {
    cook: &'a mut CookingContext,
    hosts: &'a HostObjects,
    params: Vec<Param>,
}

impl Builder<'_> {
    fn pattern(&mut self, doc: PatternDoc) -> Result<PatternSM> {
        let mut phases = Vec::with_capacity(doc.phases.len());
        for (index, phase) in doc.phases.into_iter().enumerate() {
            let children = self.nodes(phase.children).with_context(|| format!("In phase {index}"))?;
            phases.push(PhaseSM::new(children, phase.props).with_context(|| format!("In phase {index}"))?);
        }
        Ok(PatternSM::new(phases, doc.pattern))
    }

    fn nodes(&mut self, docs: Vec<NodeDoc>) -> Result<Vec<StateMachine>> {
        docs.into_iter().map(|doc| self.node(doc)).collect()
    }

    fn node(&mut self, doc: NodeDoc) -> Result<StateMachine> {
        Ok(match doc {
            NodeDoc::Action { wait, blocking, children } => {
                let children = self.nodes(children)?;
                StateMachine::Parallel(ParallelSM::new(children, wait, blocking))
            }
            NodeDoc::Saction { wait, children } => {
                let children = self.nodes(children)?;
                StateMachine::Sequential(SequentialSM::new(children, wait))
            }
            NodeDoc::End { children } => StateMachine::end(self.nodes(children)?),
            NodeDoc::Finish { child } => StateMachine::finish(self.node(*child)?),
            NodeDoc::Wait { expr } => StateMachine::Leaf(Leaf::Wait(self.expr(&expr, ValueType::Float)?)),
            NodeDoc::WaitUntil { expr } => StateMachine::Leaf(Leaf::WaitUntil(self.expr(&expr, ValueType::Bool)?)),
            NodeDoc::Emit { label, expr } => {
                let value = self.expr(&expr, ValueType::Float)?;
                StateMachine::Leaf(Leaf::Emit { label, value })
            }
            NodeDoc::ShiftPhase => StateMachine::Leaf(Leaf::ShiftPhase),
        })
    }

    fn expr(&mut self, text: &str, returns: ValueType) -> Result<Callable> {
        compile_source(self.cook, self.hosts, text, &self.params, returns)
            .with_context(|| format!("Compiling expression '{text}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::ArtifactStore;

    const BOSS: &str = r#"{
        "pattern": { "boss": { "key": "mima", "name": "Mima" } },
        "phases": [
            { "props": { "title": "opener", "hp": 100 },
              "children": [
                { "type": "saction", "children": [
                    { "type": "wait", "expr": "0.5" },
                    { "type": "emit", "label": "fire", "expr": "t * 2.0" }
                ] },
                { "type": "end", "children": [ { "type": "emit", "label": "bye", "expr": "hp" } ] }
              ] },
            { "props": { "phase_type": "spell", "timeout": 3 },
              "children": [ { "type": "wait_until", "expr": "hp < 10.0" } ] }
        ]
    }"#;

    #[test]
    fn builds_phases_and_inherits_boss() {
        let hosts = HostObjects::new();
        let pattern = load_pattern_str(&mut CookingContext::direct(), &hosts, Path::new("boss.pattern.json"), BOSS)
            .expect("load");
        assert_eq!(pattern.phases().len(), 2);
        assert!(pattern.phases()[0].has_end());
        assert_eq!(pattern.phases()[1].props.boss.as_ref().map(|b| b.key.as_str()), Some("mima"));
    }

    #[test]
    fn bad_leaf_type_names_the_expression() {
        let doc = r#"{ "phases": [ { "children": [ { "type": "wait_until", "expr": "t + 1.0" } ] } ] }"#;
        let err = load_pattern_str(&mut CookingContext::direct(), &HostObjects::new(), Path::new("bad"), doc)
            .err().expect("float condition");
        assert!(format!("{err:#}").contains("t + 1.0"), "{err:#}");
        assert!(!is_desync(&err));
    }

    #[test]
    fn failed_load_records_nothing() {
        let hosts = HostObjects::new();
        let mut cook = CookingContext::recording();
        let doc = r#"{ "phases": [ { "children": [
            { "type": "wait", "expr": "1.0" },
            { "type": "wait", "expr": "1.0 +" }
        ] } ] }"#;
        load_pattern_str(&mut cook, &hosts, Path::new("broken"), doc).err().expect("parse error");
        assert_eq!(cook.depth(), 0);
        assert_eq!(cook.pending_batches(), 0);
    }

    #[test]
    fn serving_an_unbaked_script_is_a_desync() {
        let hosts = HostObjects::new();
        let mut cook = CookingContext::serving(ArtifactStore::empty(&hosts));
        let err = load_pattern_str(&mut cook, &hosts, Path::new("boss.pattern.json"), BOSS).err().expect("desync");
        assert!(is_desync(&err), "{err:#}");
    }
}
