use serde::{Deserialize, Serialize};

use super::FileId;
use crate::expr::{Param, Signature, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUnit {
    pub name: String,
    pub params: Vec<Param>,
    pub signature: Signature,
    pub body: String,
}

/// Name and signature of one exported definition, in recording order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedRef {
    pub name: String,
    pub signature: Signature,
}

/// Everything one recording context contributes to the generated artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBatch {
    pub file_id: FileId,
    pub definitions: Vec<String>,
    pub references: Vec<TypedRef>,
}

/// Collects the printed bodies of every closure compiled while one script file is open.
#[derive(Debug)]
pub struct RecordingContext {
    file_id: FileId,
    units: Vec<RecordedUnit>,
    do_not_export: bool,
}

impl RecordingContext {
    pub fn new(file_id: FileId) -> Self {
        Self { file_id, units: Vec::new(), do_not_export: false }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn units(&self) -> &[RecordedUnit] {
        &self.units
    }

    pub fn is_suppressed(&self) -> bool {
        self.do_not_export
    }

    /// A second context for an already-recorded file keeps recording but exports nothing.
    pub(crate) fn suppress(&mut self) {
        self.do_not_export = true;
    }

    /// Appends a unit. The Nth call always gets the Nth name, which is what serving replays against.
    pub fn add(&mut self, body: String, params: &[Param], returns: ValueType) -> &RecordedUnit {
        let name = format!("{}_{}", self.file_id, self.units.len());
        self.units.push(RecordedUnit {
            name,
            params: params.to_vec(),
            signature: Signature::of(params, returns),
            body,
        });
        &self.units[self.units.len() - 1]
    }

    pub fn export(self) -> Option<ArtifactBatch> {
        if self.do_not_export || self.units.is_empty() {
            return None;
        }
        let definitions = self.units.iter().map(definition).collect();
        let references = self
            .units
            .into_iter()
            .map(|unit| TypedRef { name: unit.name, signature: unit.signature })
            .collect();
        Some(ArtifactBatch { file_id: self.file_id, definitions, references })
    }
}

fn definition(unit: &RecordedUnit) -> String {
    let params = unit.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
    let mut out = format!("// {}\nfn {}({params}) {{\n", unit.signature, unit.name);
    for line in unit.body.lines() {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('}');
    out
}
