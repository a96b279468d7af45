use kestrel_bake::bake::{
    chunk_file_name, identify, ArtifactStore, BakeError, CompileSiteKind, CookingContext, FileId, FUNCS_PER_CHUNK,
    REGISTRY_FILE,
};
use kestrel_bake::expr::{
    compile_source, compile_text, Callable, CompileError, EvalError, Param, Value, ValueType, MAX_NESTING,
};
use kestrel_bake::host::HostObjects;

fn params() -> Vec<Param> {
    vec![Param::new("t", ValueType::Float)]
}

fn compile_in(cook: &mut CookingContext, hosts: &HostObjects, text: &str) -> Result<Callable, CompileError> {
    compile_source(cook, hosts, text, &params(), ValueType::Float)
}

fn record(hosts: &HostObjects, file: &str, sources: &[String]) -> (CookingContext, Vec<Callable>) {
    let mut cook = CookingContext::recording();
    let id = cook.push_file(FileId::from(file)).expect("push").expect("recording pushes a context");
    let direct = sources.iter().map(|text| compile_in(&mut cook, hosts, text).expect("record")).collect();
    cook.pop_file(id).expect("pop");
    (cook, direct)
}

#[test]
fn three_hundred_and_one_units_split_into_two_chunks() {
    let hosts = HostObjects::new();
    let sources: Vec<String> = (0..301).map(|i| format!("t * {i}.0 + 1.0")).collect();
    let (mut cook, direct) = record(&hosts, "SmA", &sources);
    let artifacts = cook.export_all().expect("export").expect("record mode exports");

    assert_eq!(artifacts.chunks.len(), 2);
    let refs = &artifacts.registry.files[&FileId::from("SmA")];
    assert_eq!(refs.len(), 301);
    assert_eq!(refs[0].name, "SmA_0");
    assert_eq!(refs[300].name, "SmA_300");
    assert!(refs[..FUNCS_PER_CHUNK].iter().all(|unit| unit.chunk == chunk_file_name(0)));
    assert_eq!(refs[300].chunk, chunk_file_name(1));

    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join(chunk_file_name(7)), "// stale").expect("stale chunk");
    artifacts.write_to(dir.path()).expect("write");
    assert!(dir.path().join(REGISTRY_FILE).is_file());
    assert!(dir.path().join(chunk_file_name(1)).is_file());
    assert!(!dir.path().join(chunk_file_name(7)).exists());

    let store = ArtifactStore::open(dir.path(), &hosts).expect("open");
    let mut serve = CookingContext::serving(store);
    let id = serve.push_file(FileId::from("SmA")).expect("push").expect("serving pushes a context");
    for (i, expected) in direct.iter().enumerate() {
        let baked = compile_in(&mut serve, &hosts, "ignored in serve mode").expect("serve");
        assert!(baked.is_baked());
        let t = Value::Float(0.5);
        assert_eq!(baked.invoke(&[t.clone()]), expected.invoke(&[t]), "unit {i}");
    }
    serve.pop_file(id).expect("pop");
}

#[test]
fn file_with_no_units_fails_on_first_request() {
    let hosts = HostObjects::new();
    let (mut cook, _) = record(&hosts, "SmA", &["t".to_string()]);
    let artifacts = cook.export_all().expect("export").expect("artifacts");
    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    serve.push_file(FileId::from("SmB")).expect("unknown files still open");
    let err = compile_in(&mut serve, &hosts, "t").expect_err("nothing baked for SmB");
    assert!(matches!(err, CompileError::Bake(BakeError::NoBakedUnits { .. })), "{err}");
    assert!(err.is_desync());
}

#[test]
fn units_are_served_by_position_not_by_text() {
    let hosts = HostObjects::new();
    let (mut cook, _) = record(&hosts, "SmOrder", &["t + 1.0".to_string(), "t * 2.0".to_string()]);
    let artifacts = cook.export_all().expect("export").expect("artifacts");
    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    serve.push_file(FileId::from("SmOrder")).expect("push");
    let first = compile_in(&mut serve, &hosts, "t * 2.0").expect("first");
    let second = compile_in(&mut serve, &hosts, "t + 1.0").expect("second");
    assert_eq!(first.invoke(&[Value::Float(5.0)]), Ok(Value::Float(6.0)));
    assert_eq!(second.invoke(&[Value::Float(5.0)]), Ok(Value::Float(10.0)));

    let err = compile_in(&mut serve, &hosts, "t").expect_err("only two were baked");
    assert!(
        matches!(err, CompileError::Bake(BakeError::NotEnoughBakedUnits { position: 3, available: 2, .. })),
        "{err}"
    );
}

#[test]
fn second_recording_of_a_file_is_not_exported() {
    let hosts = HostObjects::new();
    let mut cook = CookingContext::recording();
    for text in ["t + 1.0", "t - 1.0"] {
        let id = cook.push_file(FileId::from("SmTwice")).expect("push").expect("id");
        compile_in(&mut cook, &hosts, text).expect("record");
        compile_in(&mut cook, &hosts, "t").expect("record");
        cook.pop_file(id).expect("pop");
    }
    let artifacts = cook.export_all().expect("export").expect("artifacts");
    assert_eq!(artifacts.registry.unit_count(), 2);

    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    serve.push_file(FileId::from("SmTwice")).expect("push");
    let first = compile_in(&mut serve, &hosts, "").expect("serve");
    assert_eq!(first.invoke(&[Value::Float(1.0)]), Ok(Value::Float(2.0)));
}

#[test]
fn text_conversion_keys_match_across_passes() {
    let hosts = HostObjects::new();
    let text = "let s = t * t in s > 4.0 || t < 0.0";
    let mut record = CookingContext::recording();
    let direct = compile_text(&mut record, &hosts, text, &params(), ValueType::Bool).expect("record");
    let artifacts = record.export_all().expect("export").expect("artifacts");
    let id = identify(CompileSiteKind::TextConversion, text);
    assert!(id.as_str().starts_with("Into"));
    assert_eq!(artifacts.registry.files[&id].len(), 1);

    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    let baked = compile_text(&mut serve, &hosts, text, &params(), ValueType::Bool).expect("serve");
    for t in [-1.0, 0.5, 2.5] {
        assert_eq!(baked.invoke(&[Value::Float(t)]), direct.invoke(&[Value::Float(t)]), "t = {t}");
    }
}

#[test]
fn host_objects_survive_baking() {
    let hosts = HostObjects::new();
    hosts.timer("spin");
    let text = "timer(\"spin\").elapsed + t";
    let mut record = CookingContext::recording();
    compile_text(&mut record, &hosts, text, &params(), ValueType::Float).expect("record");
    let artifacts = record.export_all().expect("export").expect("artifacts");
    assert!(artifacts.chunks[0].contains("get_timer(\"spin\")"), "{}", artifacts.chunks[0]);

    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    let baked = compile_text(&mut serve, &hosts, text, &params(), ValueType::Float).expect("serve");
    hosts.advance_timers(1.5);
    assert_eq!(baked.invoke(&[Value::Float(1.0)]), Ok(Value::Float(2.5)));
}

/// Records `text` as a float expression and serves it back; returns (direct, baked, chunk source).
fn bake_one(text: &str) -> (Callable, Callable, String) {
    let hosts = HostObjects::new();
    let mut record = CookingContext::recording();
    let direct = compile_text(&mut record, &hosts, text, &params(), ValueType::Float).expect("record");
    let artifacts = record.export_all().expect("export").expect("artifacts");
    let mut serve = CookingContext::serving(ArtifactStore::from_generated(&artifacts, &hosts).expect("store"));
    let baked = compile_text(&mut serve, &hosts, text, &params(), ValueType::Float).expect("serve");
    (direct, baked, artifacts.chunks.concat())
}

#[test]
fn unused_conditional_let_still_fails_when_reached() {
    let (direct, baked, _) = bake_one("t > 100.0 ? 0.0 : (let q = 1 / 0 in 1.0)");
    let at = |f: &Callable, t: f64| f.invoke(&[Value::Float(t)]);
    assert_eq!(at(&direct, 0.0), Err(EvalError::DivideByZero));
    assert!(matches!(at(&baked, 0.0), Err(EvalError::Baked { .. })), "{:?}", at(&baked, 0.0));
    assert_eq!(at(&direct, 200.0), Ok(Value::Float(0.0)));
    assert_eq!(at(&baked, 200.0), Ok(Value::Float(0.0)));
}

#[test]
fn conditional_let_chains_print_linearly() {
    let depth = 24;
    let mut text = String::from("t > 100.0 ? 0.0 : (let a0 = t in ");
    for i in 1..=depth {
        text.push_str(&format!("let a{i} = a{} + a{} in ", i - 1, i - 1));
    }
    text.push_str(&format!("a{depth})"));

    let (direct, baked, chunk) = bake_one(&text);
    assert!(chunk.len() < 8 * text.len(), "{} byte chunk for {} bytes of source", chunk.len(), text.len());
    let expected = Ok(Value::Float(f64::from(1u32 << depth)));
    assert_eq!(direct.invoke(&[Value::Float(1.0)]), expected);
    assert_eq!(baked.invoke(&[Value::Float(1.0)]), expected);
}

#[test]
fn deepest_parsed_expression_still_serves() {
    let results = std::thread::Builder::new()
        .stack_size(16 << 20)
        .spawn(|| {
            let text = format!("t{}", " - 0.5".repeat(MAX_NESTING - 4));
            let (direct, baked, _) = bake_one(&text);
            let run = |f: &Callable| f.invoke(&[Value::Float(100.0)]).ok().and_then(|v| v.as_float());
            (run(&direct), run(&baked))
        })
        .expect("spawn")
        .join()
        .expect("bake thread");
    let expected = 100.0 - 0.5 * (MAX_NESTING - 4) as f64;
    assert_eq!(results, (Some(expected), Some(expected)));
}
