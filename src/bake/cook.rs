use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    identify, ArtifactBatch, ArtifactStore, BakeError, CompileSiteKind, FileId, GeneratedArtifacts, KeySource,
    RecordingContext, ServingContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Compile every expression in process.
    #[default]
    Direct,
    /// Compile in process and record printed bodies for export.
    Record,
    /// Never compile; replay baked units in call order.
    Serve,
}

impl BuildMode {
    /// Mode selected by the `bake_record` / `bake_serve` cargo features.
    pub fn compiled_default() -> Self {
        if cfg!(feature = "bake_serve") {
            BuildMode::Serve
        } else if cfg!(feature = "bake_record") {
            BuildMode::Record
        } else {
            BuildMode::Direct
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuildMode::Direct => "direct",
            BuildMode::Record => "record",
            BuildMode::Serve => "serve",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(BuildMode::Direct),
            "record" => Ok(BuildMode::Record),
            "serve" => Ok(BuildMode::Serve),
            other => Err(format!("unknown build mode '{other}' (expected direct, record or serve)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

enum FileContext {
    Recording(RecordingContext),
    Serving(ServingContext),
}

impl FileContext {
    fn kind(&self) -> &'static str {
        match self {
            FileContext::Recording(_) => "recording",
            FileContext::Serving(_) => "serving",
        }
    }

    fn file_id(&self) -> &FileId {
        match self {
            FileContext::Recording(ctx) => ctx.file_id(),
            FileContext::Serving(ctx) => ctx.file_id(),
        }
    }
}

struct Open {
    id: ContextId,
    ctx: FileContext,
}

/// Owns the stack of open file contexts for one build pass.
pub struct CookingContext {
    mode: BuildMode,
    stack: Vec<Open>,
    opened: HashSet<FileId>,
    batches: Vec<ArtifactBatch>,
    store: Option<ArtifactStore>,
    next_id: u64,
}

impl CookingContext {
    fn with_mode(mode: BuildMode, store: Option<ArtifactStore>) -> Self {
        Self { mode, stack: Vec::new(), opened: HashSet::new(), batches: Vec::new(), store, next_id: 0 }
    }

    pub fn direct() -> Self {
        Self::with_mode(BuildMode::Direct, None)
    }

    pub fn recording() -> Self {
        Self::with_mode(BuildMode::Record, None)
    }

    pub fn serving(store: ArtifactStore) -> Self {
        Self::with_mode(BuildMode::Serve, Some(store))
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    /// Pushes the context the build mode calls for. Direct mode pushes nothing and returns `None`.
    pub fn push_file(&mut self, file_id: FileId) -> Result<Option<ContextId>, BakeError> {
        let ctx = match (self.mode, &self.store) {
            (BuildMode::Direct, _) => return Ok(None),
            (BuildMode::Record, _) => {
                let mut ctx = RecordingContext::new(file_id.clone());
                if !self.opened.insert(file_id) {
                    tracing::debug!(file = %ctx.file_id(), "file recorded twice; later copy will not be exported");
                    ctx.suppress();
                }
                FileContext::Recording(ctx)
            }
            (BuildMode::Serve, Some(store)) => FileContext::Serving(ServingContext::new(file_id, store)?),
            (BuildMode::Serve, None) => return Err(BakeError::NoActiveContext("artifact store")),
        };
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.stack.push(Open { id, ctx });
        Ok(Some(id))
    }

    /// Pops `id`, which must be the top of the stack. A finished recording becomes a pending batch.
    pub fn pop_file(&mut self, id: ContextId) -> Result<(), BakeError> {
        self.pop(id, true)
    }

    fn pop(&mut self, id: ContextId, keep: bool) -> Result<(), BakeError> {
        match self.stack.last() {
            Some(top) if top.id == id => {}
            top => {
                let closing = match self.stack.iter().find(|open| open.id == id) {
                    Some(open) => open.ctx.file_id().to_string(),
                    None => format!("unknown context #{}", id.0),
                };
                let top = top.map(|open| open.ctx.file_id().to_string()).unwrap_or_else(|| "nothing".to_string());
                return Err(BakeError::MismatchedClose { closing, top });
            }
        }
        let Some(open) = self.stack.pop() else {
            return Ok(());
        };
        match open.ctx {
            FileContext::Recording(ctx) if !keep => {
                tracing::debug!(file = %ctx.file_id(), units = ctx.units().len(), "recording discarded");
            }
            FileContext::Recording(ctx) => {
                if let Some(batch) = ctx.export() {
                    tracing::trace!(file = %batch.file_id, units = batch.references.len(), "recorded");
                    self.batches.push(batch);
                }
            }
            FileContext::Serving(ctx) => {
                if ctx.remaining() > 0 {
                    tracing::debug!(file = %ctx.file_id(), unused = ctx.remaining(), "baked units left unserved");
                }
            }
        }
        Ok(())
    }

    /// Opens a context keyed by `(kind, key)`. The guard closes it again when dropped.
    pub fn open_context<K: KeySource + ?Sized>(
        &mut self,
        kind: CompileSiteKind,
        key: &K,
    ) -> Result<ContextGuard<'_>, BakeError> {
        let id = match self.mode {
            BuildMode::Direct => None,
            _ => self.push_file(identify(kind, key))?,
        };
        Ok(ContextGuard { cook: self, id })
    }

    pub fn current_recording(&mut self) -> Result<Option<&mut RecordingContext>, BakeError> {
        match self.stack.last_mut().map(|open| &mut open.ctx) {
            None => Ok(None),
            Some(FileContext::Recording(ctx)) => Ok(Some(ctx)),
            Some(other) => Err(BakeError::WrongContextKind { expected: "recording", actual: other.kind() }),
        }
    }

    pub fn current_serving(&mut self) -> Result<Option<&mut ServingContext>, BakeError> {
        match self.stack.last_mut().map(|open| &mut open.ctx) {
            None => Ok(None),
            Some(FileContext::Serving(ctx)) => Ok(Some(ctx)),
            Some(other) => Err(BakeError::WrongContextKind { expected: "serving", actual: other.kind() }),
        }
    }

    /// Drains the pending batches into artifacts. Only a recording pass produces any.
    pub fn export_all(&mut self) -> Result<Option<GeneratedArtifacts>, BakeError> {
        if self.mode != BuildMode::Record {
            return Ok(None);
        }
        if !self.stack.is_empty() {
            return Err(BakeError::ContextsStillOpen(self.stack.len()));
        }
        let batches = std::mem::take(&mut self.batches);
        let artifacts = GeneratedArtifacts::from_batches(batches);
        tracing::info!(
            files = artifacts.registry.files.len(),
            units = artifacts.registry.unit_count(),
            chunks = artifacts.chunks.len(),
            "exported baked expressions"
        );
        Ok(Some(artifacts))
    }
}

/// Scoped handle for a context opened with [`CookingContext::open_context`].
pub struct ContextGuard<'a> {
    cook: &'a mut CookingContext,
    id: Option<ContextId>,
}

impl ContextGuard<'_> {
    /// Closes the context and reports nesting errors instead of panicking.
    pub fn close(mut self) -> Result<(), BakeError> {
        match self.id.take() {
            Some(id) => self.cook.pop_file(id),
            None => Ok(()),
        }
    }

    /// Closes the context without exporting anything it recorded.
    pub fn discard(mut self) -> Result<(), BakeError> {
        match self.id.take() {
            Some(id) => self.cook.pop(id, false),
            None => Ok(()),
        }
    }
}

impl Deref for ContextGuard<'_> {
    type Target = CookingContext;

    fn deref(&self) -> &CookingContext {
        self.cook
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut CookingContext {
        self.cook
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(err) = self.cook.pop_file(id) {
                tracing::error!(%err, "context nesting violated");
                if !std::thread::panicking() {
                    panic!("{err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Param, ValueType};
    use crate::host::HostObjects;

    #[test]
    fn direct_mode_pushes_nothing() {
        let mut cook = CookingContext::direct();
        let guard = cook.open_context(CompileSiteKind::TextConversion, "1.0").expect("open");
        assert_eq!(guard.depth(), 0);
        guard.close().expect("close");
        assert!(cook.export_all().expect("export").is_none());
    }

    #[test]
    fn duplicate_files_are_suppressed() {
        let mut cook = CookingContext::recording();
        for _ in 0..2 {
            let mut guard = cook.open_context(CompileSiteKind::ScriptDump, "same.json").expect("open");
            let rec = guard.current_recording().expect("kind").expect("active");
            rec.add("return t;".into(), &[Param::new("t", ValueType::Float)], ValueType::Float);
            guard.close().expect("close");
        }
        assert_eq!(cook.pending_batches(), 1);
        let artifacts = cook.export_all().expect("export").expect("record mode");
        assert_eq!(artifacts.registry.unit_count(), 1);
    }

    #[test]
    fn wrong_kind_and_out_of_order_pops_fail() {
        let mut cook = CookingContext::recording();
        let outer = cook.push_file(FileId::from("SmOuter")).expect("push").expect("id");
        let inner = cook.push_file(FileId::from("SmInner")).expect("push").expect("id");
        let err = cook.pop_file(outer).expect_err("outer is not on top");
        assert!(matches!(err, BakeError::MismatchedClose { .. }), "{err}");
        assert!(err.to_string().contains("SmOuter"));
        assert!(matches!(cook.current_serving(), Err(BakeError::WrongContextKind { expected: "serving", .. })));
        assert!(matches!(cook.export_all(), Err(BakeError::ContextsStillOpen(2))));
        cook.pop_file(inner).expect("inner");
        cook.pop_file(outer).expect("outer");
        assert!(cook.current_recording().expect("empty stack").is_none());
    }

    #[test]
    fn serving_context_loads_from_store() {
        let hosts = HostObjects::new();
        let mut cook = CookingContext::serving(ArtifactStore::empty(&hosts));
        let mut guard = cook.open_context(CompileSiteKind::ScriptDump, "missing.json").expect("open");
        let serving = guard.current_serving().expect("kind").expect("active");
        assert_eq!(serving.remaining(), 0);
        assert!(serving.file_id().as_str().starts_with("Sm"));
    }

    #[test]
    fn build_mode_parses_names() {
        assert_eq!("Serve".parse::<BuildMode>(), Ok(BuildMode::Serve));
        assert!("jit".parse::<BuildMode>().is_err());
    }
}
