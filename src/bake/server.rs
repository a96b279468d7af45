use super::{ArtifactStore, BakeError, BakedUnit, FileId};
use crate::expr::{Callable, Signature, Value};

/// Hands out the baked units of one file in the order they were recorded.
pub struct ServingContext {
    file_id: FileId,
    units: Vec<BakedUnit>,
    cursor: usize,
}

impl ServingContext {
    /// Loads the units for `file_id` up front. A file with nothing baked is not an error until
    /// something asks for a unit.
    pub fn new(file_id: FileId, store: &ArtifactStore) -> Result<Self, BakeError> {
        let units = store.units_for(&file_id)?;
        Ok(Self { file_id, units, cursor: 0 })
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.units.len() - self.cursor
    }

    /// Takes the unit at the cursor and binds `proxies` as its leading arguments. `expected`
    /// is the full signature including the proxied parameters.
    pub fn next(&mut self, expected: &Signature, proxies: Vec<Value>) -> Result<Callable, BakeError> {
        let Some(unit) = self.units.get(self.cursor).cloned() else {
            if self.units.is_empty() {
                return Err(BakeError::NoBakedUnits { file_id: self.file_id.clone() });
            }
            return Err(BakeError::NotEnoughBakedUnits {
                file_id: self.file_id.clone(),
                position: self.cursor + 1,
                available: self.units.len(),
            });
        };
        self.cursor += 1;
        let mismatch = |actual: String| BakeError::TypeMismatch {
            file_id: self.file_id.clone(),
            position: self.cursor,
            total: self.units.len(),
            expected: expected.to_string(),
            actual,
        };
        if unit.signature() != expected {
            return Err(mismatch(unit.signature().to_string()));
        }
        let actual = proxies.iter().map(|v| v.ty().name()).collect::<Vec<_>>().join(", ");
        Callable::from_baked(unit).bind_leading(proxies).map_err(|_| mismatch(format!("proxies ({actual})")))
    }
}
