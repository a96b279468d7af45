use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use glam::DVec2;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use serde::{Deserialize, Serialize};

use super::{ArtifactBatch, BakeError, FileId};
use crate::expr::{value_from_dynamic, value_to_dynamic, EvalError, Signature, Value};
use crate::host::{EntityHandle, HostObjects, TimerHandle};

/// Upper bound on function definitions per generated chunk.
pub const FUNCS_PER_CHUNK: usize = 300;
pub const REGISTRY_FILE: &str = "registry.json";
const CHUNK_PREFIX: &str = "generated_";
const CHUNK_EXT: &str = "rhai";

pub fn chunk_file_name(index: usize) -> String {
    format!("{CHUNK_PREFIX}{index}.{CHUNK_EXT}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub name: String,
    pub chunk: String,
    pub signature: Signature,
}

/// Maps each file id to its units in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRegistry {
    #[serde(default = "ArtifactRegistry::default_version")]
    pub version: u32,
    #[serde(default)]
    pub files: BTreeMap<FileId, Vec<UnitRef>>,
}

impl ArtifactRegistry {
    fn default_version() -> u32 {
        1
    }

    pub fn unit_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Output of a recording pass: chunk sources in file-name order plus the registry.
#[derive(Debug, Clone, Default)]
pub struct GeneratedArtifacts {
    pub chunks: Vec<String>,
    pub registry: ArtifactRegistry,
}

impl GeneratedArtifacts {
    pub fn from_batches(batches: Vec<ArtifactBatch>) -> Self {
        let mut chunks: Vec<String> = Vec::new();
        let mut registry = ArtifactRegistry { version: ArtifactRegistry::default_version(), files: BTreeMap::new() };
        let mut written = 0usize;
        for batch in batches {
            let refs = registry.files.entry(batch.file_id).or_default();
            for (definition, reference) in batch.definitions.into_iter().zip(batch.references) {
                let index = written / FUNCS_PER_CHUNK;
                if chunks.len() == index {
                    chunks.push(String::from("// Generated expression bodies. Regenerate with bake_expressions.\n"));
                }
                let chunk = &mut chunks[index];
                chunk.push('\n');
                chunk.push_str(&definition);
                chunk.push('\n');
                refs.push(UnitRef { name: reference.name, chunk: chunk_file_name(index), signature: reference.signature });
                written += 1;
            }
        }
        Self { chunks, registry }
    }

    /// Writes chunks and the registry into `dir`, removing chunks left over from a larger bake.
    pub fn write_to(&self, dir: &Path) -> Result<(), BakeError> {
        fs::create_dir_all(dir).map_err(|source| BakeError::Io { path: dir.to_path_buf(), source })?;
        let entries = fs::read_dir(dir).map_err(|source| BakeError::Io { path: dir.to_path_buf(), source })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = path.extension().and_then(|ext| ext.to_str()) == Some(CHUNK_EXT)
                && path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.starts_with(CHUNK_PREFIX));
            if stale {
                fs::remove_file(&path).map_err(|source| BakeError::Io { path: path.clone(), source })?;
            }
        }
        for (index, source) in self.chunks.iter().enumerate() {
            let path = dir.join(chunk_file_name(index));
            fs::write(&path, source).map_err(|source| BakeError::Io { path: path.clone(), source })?;
        }
        let path = dir.join(REGISTRY_FILE);
        let json = serde_json::to_string_pretty(&self.registry)
            .map_err(|source| BakeError::Registry { path: path.clone(), source })?;
        fs::write(&path, json).map_err(|source| BakeError::Io { path, source })?;
        Ok(())
    }
}

/// A function from a compiled chunk together with the interpreter that runs it.
#[derive(Clone)]
pub struct BakedUnit {
    name: String,
    signature: Signature,
    engine: Rc<Engine>,
    ast: Rc<AST>,
}

impl BakedUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn call<'a>(&self, args: impl Iterator<Item = &'a Value>) -> Result<Value, EvalError> {
        let args: Vec<Dynamic> = args.map(value_to_dynamic).collect();
        let result = self
            .engine
            .call_fn::<Dynamic>(&mut Scope::new(), &self.ast, &self.name, args)
            .map_err(|err| EvalError::Baked { name: self.name.clone(), message: err.to_string() })?;
        value_from_dynamic(result).map_err(|actual| EvalError::ReturnType { expected: self.signature.returns, actual })
    }
}

/// Loaded artifacts for serving. Chunks are compiled once and shared by every unit they hold.
pub struct ArtifactStore {
    engine: Rc<Engine>,
    registry: ArtifactRegistry,
    chunks: HashMap<String, Rc<AST>>,
}

impl ArtifactStore {
    pub fn empty(hosts: &HostObjects) -> Self {
        Self { engine: Rc::new(runtime_engine(hosts)), registry: ArtifactRegistry::default(), chunks: HashMap::new() }
    }

    pub fn open(dir: &Path, hosts: &HostObjects) -> Result<Self, BakeError> {
        let registry_path = dir.join(REGISTRY_FILE);
        let text =
            fs::read_to_string(&registry_path).map_err(|source| BakeError::Io { path: registry_path.clone(), source })?;
        let registry: ArtifactRegistry =
            serde_json::from_str(&text).map_err(|source| BakeError::Registry { path: registry_path, source })?;
        let mut sources = BTreeMap::new();
        for chunk in registry.files.values().flatten().map(|unit| unit.chunk.clone()) {
            if !sources.contains_key(&chunk) {
                let path = dir.join(&chunk);
                let source = fs::read_to_string(&path).map_err(|source| BakeError::Io { path, source })?;
                sources.insert(chunk, source);
            }
        }
        Self::compile(registry, sources, hosts)
    }

    /// Serves artifacts straight from a recording pass without touching the filesystem.
    pub fn from_generated(artifacts: &GeneratedArtifacts, hosts: &HostObjects) -> Result<Self, BakeError> {
        let sources = artifacts
            .chunks
            .iter()
            .enumerate()
            .map(|(index, source)| (chunk_file_name(index), source.clone()))
            .collect();
        Self::compile(artifacts.registry.clone(), sources, hosts)
    }

    fn compile(
        registry: ArtifactRegistry,
        sources: BTreeMap<String, String>,
        hosts: &HostObjects,
    ) -> Result<Self, BakeError> {
        let engine = runtime_engine(hosts);
        let mut chunks = HashMap::with_capacity(sources.len());
        for (chunk, source) in sources {
            let ast =
                engine.compile(&source).map_err(|err| BakeError::Chunk { chunk: chunk.clone(), message: err.to_string() })?;
            chunks.insert(chunk, Rc::new(ast));
        }
        tracing::debug!(files = registry.files.len(), units = registry.unit_count(), chunks = chunks.len(), "artifacts loaded");
        Ok(Self { engine: Rc::new(engine), registry, chunks })
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Units baked for `file_id`, in recording order. Unknown ids yield an empty list.
    pub fn units_for(&self, file_id: &FileId) -> Result<Vec<BakedUnit>, BakeError> {
        let Some(refs) = self.registry.files.get(file_id) else {
            return Ok(Vec::new());
        };
        refs.iter()
            .map(|unit| {
                let missing =
                    || BakeError::MissingUnit { file_id: file_id.clone(), name: unit.name.clone(), chunk: unit.chunk.clone() };
                let ast = self.chunks.get(&unit.chunk).ok_or_else(missing)?;
                if !ast.iter_functions().any(|f| f.name == unit.name) {
                    return Err(missing());
                }
                Ok(BakedUnit {
                    name: unit.name.clone(),
                    signature: unit.signature.clone(),
                    engine: Rc::clone(&self.engine),
                    ast: Rc::clone(ast),
                })
            })
            .collect()
    }
}

type FnResult<T> = Result<T, Box<EvalAltResult>>;

fn overflow(op: &str) -> Box<EvalAltResult> {
    format!("integer overflow in {op}").into()
}

// A printed unit nests a few rhai levels for each tree level the expression parser allows.
const MAX_EXPR_DEPTH: usize = 8 * crate::expr::MAX_NESTING;

/// Raw interpreter with exactly the functions printed unit bodies call.
pub fn runtime_engine(hosts: &HostObjects) -> Engine {
    let mut engine = Engine::new_raw();
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine
        .register_type_with_name::<DVec2>("Vec2")
        .register_type_with_name::<TimerHandle>("Timer")
        .register_type_with_name::<EntityHandle>("Entity");

    engine
        .register_fn("vec2", |x: f64, y: f64| DVec2::new(x, y))
        .register_fn("vec_x", |v: DVec2| v.x)
        .register_fn("vec_y", |v: DVec2| v.y)
        .register_fn("vec_length", |v: DVec2| v.length())
        .register_fn("+", |a: DVec2, b: DVec2| a + b)
        .register_fn("-", |a: DVec2, b: DVec2| a - b)
        .register_fn("*", |a: DVec2, b: f64| a * b)
        .register_fn("*", |a: f64, b: DVec2| a * b)
        .register_fn("/", |a: DVec2, b: f64| a / b)
        .register_fn("==", |a: DVec2, b: DVec2| a == b)
        .register_fn("!=", |a: DVec2, b: DVec2| a != b);

    engine
        .register_fn("neg", |v: f64| -v)
        .register_fn("neg", |v: i64| -> FnResult<i64> { v.checked_neg().ok_or_else(|| overflow("negation")) })
        .register_fn("neg", |v: DVec2| -v)
        .register_fn("not", |v: bool| !v)
        .register_fn("sin", f64::sin)
        .register_fn("cos", f64::cos)
        .register_fn("sqrt", f64::sqrt)
        .register_fn("floor", f64::floor)
        .register_fn("abs", f64::abs)
        .register_fn("abs", |v: i64| -> FnResult<i64> { v.checked_abs().ok_or_else(|| overflow("abs")) })
        .register_fn("min", f64::min)
        .register_fn("max", f64::max)
        .register_fn("min", |a: i64, b: i64| a.min(b))
        .register_fn("max", |a: i64, b: i64| a.max(b))
        .register_fn("lerp", crate::expr::lerp)
        .register_fn("clamp", crate::expr::clamp)
        .register_fn("to_float", |v: i64| v as f64)
        .register_fn("float_inf", || f64::INFINITY)
        .register_fn("float_nan", || f64::NAN);

    engine
        .register_fn("timer_elapsed", |t: TimerHandle| t.elapsed())
        .register_fn("entity_hp", |e: EntityHandle| e.hp())
        .register_fn("entity_position", |e: EntityHandle| e.position());

    let timers = hosts.clone();
    engine.register_fn("get_timer", move |name: &str| timers.timer(name));
    let entities = hosts.clone();
    engine.register_fn("get_entity", move |id: &str| -> FnResult<EntityHandle> {
        entities.entity(id).ok_or_else(|| format!("unknown entity '{id}'").into())
    });
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::TypedRef;
    use crate::expr::ValueType;

    fn batch(file: &str, count: usize) -> ArtifactBatch {
        let sig = Signature::new(vec![ValueType::Float], ValueType::Float);
        ArtifactBatch {
            file_id: FileId::from(file),
            definitions: (0..count).map(|i| format!("fn {file}_{i}(t) {{\n    return (t + {i}.0);\n}}")).collect(),
            references: (0..count).map(|i| TypedRef { name: format!("{file}_{i}"), signature: sig.clone() }).collect(),
        }
    }

    #[test]
    fn chunks_hold_at_most_the_limit() {
        let out = GeneratedArtifacts::from_batches(vec![batch("SmA", 250), batch("SmB", 51)]);
        assert_eq!(out.chunks.len(), 2);
        assert_eq!(out.chunks[1].matches("\nfn ").count(), 1);
        let b = &out.registry.files[&FileId::from("SmB")];
        assert_eq!(b[49].chunk, "generated_0.rhai");
        assert_eq!(b[50].chunk, "generated_1.rhai");
        let exact = GeneratedArtifacts::from_batches(vec![batch("SmA", FUNCS_PER_CHUNK)]);
        assert_eq!(exact.chunks.len(), 1);
    }

    #[test]
    fn served_units_run_in_the_raw_engine() {
        let hosts = HostObjects::new();
        let store = ArtifactStore::from_generated(&GeneratedArtifacts::from_batches(vec![batch("SmA", 3)]), &hosts)
            .expect("store");
        let units = store.units_for(&FileId::from("SmA")).expect("units");
        assert_eq!(units.len(), 3);
        assert_eq!(units[2].call([Value::Float(1.0)].iter()), Ok(Value::Float(3.0)));
        assert!(store.units_for(&FileId::from("SmZ")).expect("empty").is_empty());
    }

    #[test]
    fn engine_exposes_host_lookups() {
        let hosts = HostObjects::new();
        hosts.register_entity(EntityHandle::new("boss", DVec2::new(1.0, 2.0)));
        let engine = runtime_engine(&hosts);
        let y: f64 = engine.eval("vec_y(entity_position(get_entity(\"boss\")))").expect("eval");
        assert_eq!(y, 2.0);
        assert!(engine.eval::<Dynamic>("get_entity(\"ghost\")").is_err());
        let v: DVec2 = engine.eval("vec2(1.0, 2.0) * 2.0 + vec2(1.0, 1.0)").expect("vec math");
        assert_eq!(v, DVec2::new(3.0, 5.0));
    }

    #[test]
    fn overly_deep_chunks_fail_to_load() {
        // rhai recurses up to the limit before refusing, which needs more than a test thread's stack.
        let loaded = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                let depth = MAX_EXPR_DEPTH + 16;
                let body = format!("{}t{}", "(".repeat(depth), ")".repeat(depth));
                let artifacts = GeneratedArtifacts::from_batches(vec![ArtifactBatch {
                    file_id: FileId::from("SmDeep"),
                    definitions: vec![format!("fn SmDeep_0(t) {{\n    return {body};\n}}")],
                    references: vec![TypedRef {
                        name: "SmDeep_0".into(),
                        signature: Signature::new(vec![ValueType::Float], ValueType::Float),
                    }],
                }]);
                match ArtifactStore::from_generated(&artifacts, &HostObjects::new()) {
                    Err(BakeError::Chunk { chunk, .. }) => Ok(chunk),
                    Err(other) => Err(other.to_string()),
                    Ok(_) => Err("deep chunk compiled".to_string()),
                }
            })
            .expect("spawn")
            .join()
            .expect("no stack overflow");
        assert_eq!(loaded, Ok(chunk_file_name(0)));
    }
}
