//! End-to-end tests: obfuscated host units, bundles on disk, patched output

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;
use weft_loader::{
    title_suffix, LoaderConfig, LoaderError, MemorySource, Namespace, Pipeline, SourceError,
    UnitSource,
};
use weft_unit::unit::{access, flags};
use weft_unit::{
    ClassUnit, Constant, FieldDef, Insn, InvokeKind, MappingTable, MemberRef, MethodDef,
    PatchError,
};

const MAPPINGS: &str = "\
class\tq\tmain/MainApp\t
class\tr\tgameManaging/GameManager\t
class\ts\tworld/World\t
class\tt\tbasics/DisplayManager\t
method\tq.a\tmain\t([Ljava/lang/String;)V
method\tr.b\tinit\t()V
field\tq.c\tVERSION_STRING\tLjava/lang/String;
field\ts.d\tseed\tJ
method\tt.e\tcreateDisplay\t()V
";

const CONFIG: &str = r#"
[loader]
workers = 2

[hook]
method = "main([Ljava/lang/String;)V"
before = "gameManaging/GameManager.init()V"
call = "weft/Hooks.init(Ljava/lang/Object;)V"
"#;

const TITLE: &str = r#"
[title]
unit = "basics/DisplayManager"
method = "createDisplay()V"
anchor = "org/lwjgl/opengl/Display.setTitle(Ljava/lang/String;)V"
"#;

const SET_TITLE: &str = "(Ljava/lang/String;)V";

fn host_source(version: &str) -> MemorySource {
    let mut entry = ClassUnit::new("q");
    entry.class_version = 52;
    entry.fields.push(FieldDef {
        access: access::PUBLIC | access::STATIC | access::FINAL,
        name: "c".to_string(),
        descriptor: "Ljava/lang/String;".to_string(),
        constant: Some(Constant::Str(format!("Version {}", version))),
    });
    entry.methods.push(MethodDef {
        access: access::PUBLIC | access::STATIC,
        name: "a".to_string(),
        descriptor: "([Ljava/lang/String;)V".to_string(),
        code: vec![
            Insn::New { class: "r".to_string() },
            Insn::invoke(InvokeKind::Special, "r", "<init>", "()V"),
            Insn::invoke(InvokeKind::Static, "r", "b", "()V"),
            Insn::Return,
        ],
    });

    let mut world = ClassUnit::new("s");
    world.fields.push(FieldDef {
        access: access::PRIVATE,
        name: "d".to_string(),
        descriptor: "J".to_string(),
        constant: None,
    });

    let mut display = ClassUnit::new("t");
    display.methods.push(MethodDef {
        access: access::PUBLIC | access::STATIC,
        name: "e".to_string(),
        descriptor: "()V".to_string(),
        code: vec![
            Insn::ConstStr {
                value: "Host".to_string(),
            },
            Insn::invoke(InvokeKind::Static, "org/lwjgl/opengl/Display", "setTitle", SET_TITLE),
            Insn::Return,
        ],
    });

    MemorySource::new()
        .with_unit("q", entry.encode())
        .with_unit("r", ClassUnit::new("r").encode())
        .with_unit("s", world.encode())
        .with_unit("t", display.encode())
}

fn write_bundle(dir: &Path, id: &str, manifest: &str) {
    let root = dir.join(id);
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("bundle.toml"), manifest).unwrap();
}

fn bundle_dir() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_bundle(
        temp.path(),
        "core",
        r#"
[bundle]
id = "core"
version = "1.2.0"

[depends]
host = ">=1.7.0"
weft = "*"

[[patches]]
target = "main/MainApp"
kind = "inject-field"
member = "coreLoaded:Z"
static = true
"#,
    );
    write_bundle(
        temp.path(),
        "ui",
        r#"
[bundle]
id = "ui"
version = "0.3.0"

[depends]
core = "^1.0"

[[patches]]
target = "main/MainApp"
kind = "widen-access"
member = "VERSION_STRING:Ljava/lang/String;"
mutable = true
"#,
    );
    temp
}

fn write_broken_bundle(dir: &Path) {
    write_bundle(
        dir,
        "broken",
        r#"
[bundle]
id = "broken"
version = "1.0.0"

[[patches]]
target = "world/World"
kind = "widen-access"
member = "missing:I"
"#,
    );
}

fn start_with(config: &str, version: &str, bundles: &TempDir) -> Pipeline {
    Pipeline::start(
        LoaderConfig::from_str(config).unwrap(),
        MappingTable::load(MAPPINGS).unwrap(),
        bundles.path(),
        Arc::new(host_source(version)),
    )
    .unwrap()
}

fn start(version: &str, bundles: &TempDir) -> Pipeline {
    start_with(CONFIG, version, bundles)
}

#[test]
fn test_resolution_order() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);
    let ids: Vec<_> = pipeline.context().bundles().ids().collect();
    assert_eq!(ids, ["host", "weft", "core", "ui"]);
    assert_eq!(pipeline.context().host().class_version, 52);
}

#[test]
fn test_entry_unit_patched() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);
    assert_eq!(pipeline.prepare().unwrap(), 1);
    assert!(pipeline.is_cached("main/MainApp", Namespace::Intermediate));

    let bytes = pipeline.load("main/MainApp", Namespace::Intermediate).unwrap();
    let unit = ClassUnit::decode(&bytes).unwrap();
    assert_eq!(unit.name, "main/MainApp");
    assert_ne!(unit.flags & flags::PATCHED, 0);

    let version = unit
        .field(&MemberRef::new("VERSION_STRING", "Ljava/lang/String;"))
        .unwrap();
    assert_eq!(version.access & access::FINAL, 0);
    assert!(unit.field(&MemberRef::new("coreLoaded", "Z")).is_some());

    let main = unit.method(&MemberRef::new("main", "([Ljava/lang/String;)V")).unwrap();
    assert_eq!(
        main.code,
        vec![
            Insn::New { class: "gameManaging/GameManager".to_string() },
            Insn::invoke(InvokeKind::Special, "gameManaging/GameManager", "<init>", "()V"),
            Insn::New { class: "main/MainApp".to_string() },
            Insn::Dup,
            Insn::invoke(InvokeKind::Special, "main/MainApp", "<init>", "()V"),
            Insn::invoke(InvokeKind::Static, "weft/Hooks", "init", "(Ljava/lang/Object;)V"),
            Insn::invoke(InvokeKind::Static, "gameManaging/GameManager", "init", "()V"),
            Insn::Return,
        ]
    );
}

#[test]
fn test_obfuscated_request_shares_cache() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);

    let by_intermediate = pipeline.load("main/MainApp", Namespace::Intermediate).unwrap();
    let by_obfuscated = pipeline.load("q", Namespace::Obfuscated).unwrap();
    assert!(Arc::ptr_eq(&by_intermediate, &by_obfuscated));
    assert_eq!(pipeline.cached_count(), 1);
}

#[test]
fn test_untargeted_unit_passes_through() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);

    let bytes = pipeline.load("world/World", Namespace::Intermediate).unwrap();
    let unit = ClassUnit::decode(&bytes).unwrap();
    assert_eq!(unit.name, "world/World");
    assert_eq!(unit.flags & flags::PATCHED, 0);
    assert_eq!(unit.fields[0].name, "seed");
}

#[test]
fn test_concurrent_requests_patch_once() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);

    let results: Vec<Arc<[u8]>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| pipeline.load("main/MainApp", Namespace::Intermediate).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|bytes| Arc::ptr_eq(bytes, &results[0])));
}

#[test]
fn test_deliver_to_sink() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);

    let defined = Mutex::new(Vec::new());
    let sink = |id: &str, bytes: Arc<[u8]>| {
        defined.lock().unwrap().push((id.to_string(), bytes));
        Ok::<(), SourceError>(())
    };
    pipeline.deliver("s", Namespace::Obfuscated, &sink).unwrap();

    let defined = defined.into_inner().unwrap();
    assert_eq!(defined.len(), 1);
    assert_eq!(defined[0].0, "world/World");
}

#[test]
fn test_host_too_old() {
    let bundles = bundle_dir();
    let err = Pipeline::start(
        LoaderConfig::from_str(CONFIG).unwrap(),
        MappingTable::load(MAPPINGS).unwrap(),
        bundles.path(),
        Arc::new(host_source("1.6b")),
    )
    .err()
    .unwrap();
    assert!(matches!(err, LoaderError::Resolver(_)));
}

#[test]
fn test_prepare_fails_fast_on_bad_patch() {
    let bundles = bundle_dir();
    write_broken_bundle(bundles.path());
    let pipeline = start("1.7.2", &bundles);

    match pipeline.prepare() {
        Err(LoaderError::Patch(PatchError::TargetNotFound { unit, bundle, .. })) => {
            assert_eq!(unit, "world/World");
            assert_eq!(bundle, "broken");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(!pipeline.is_cached("world/World", Namespace::Intermediate));
    assert!(pipeline.is_aborted());
    assert!(matches!(
        pipeline.load("main/MainApp", Namespace::Intermediate),
        Err(LoaderError::Aborted { .. })
    ));
}

#[test]
fn test_patch_failure_aborts_run() {
    let bundles = bundle_dir();
    write_broken_bundle(bundles.path());
    let pipeline = start("1.7.2", &bundles);

    assert!(matches!(
        pipeline.load("world/World", Namespace::Intermediate),
        Err(LoaderError::Patch(PatchError::TargetNotFound { .. }))
    ));
    assert!(pipeline.is_aborted());

    // Neither a retry nor an unrelated unit gets past the failure.
    for id in ["world/World", "main/MainApp"] {
        match pipeline.load(id, Namespace::Intermediate) {
            Err(LoaderError::Aborted { unit, .. }) => {
                assert_eq!(unit.as_deref(), Some("world/World"))
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    let defined = Mutex::new(Vec::new());
    let sink = |id: &str, _: Arc<[u8]>| {
        defined.lock().unwrap().push(id.to_string());
        Ok::<(), SourceError>(())
    };
    assert!(matches!(
        pipeline.deliver("q", Namespace::Obfuscated, &sink),
        Err(LoaderError::Aborted { .. })
    ));
    assert!(defined.into_inner().unwrap().is_empty());

    assert!(matches!(pipeline.prepare(), Err(LoaderError::Aborted { .. })));
    assert_eq!(pipeline.cached_count(), 0);
}

#[test]
fn test_unknown_unit() {
    let bundles = bundle_dir();
    let pipeline = start("1.7.2", &bundles);
    assert!(matches!(
        pipeline.load("nowhere/Unit", Namespace::Intermediate),
        Err(LoaderError::UnitNotFound(id)) if id == "nowhere/Unit"
    ));

    // Nothing patches that unit, so the run goes on.
    assert!(!pipeline.is_aborted());
    assert!(pipeline.load("main/MainApp", Namespace::Intermediate).is_ok());
}

#[test]
fn test_request_uses_configured_namespace() {
    let bundles = bundle_dir();
    let config = CONFIG.replacen("[loader]\n", "[loader]\nrequest_namespace = \"obfuscated\"\n", 1);
    let pipeline = start_with(&config, "1.7.2", &bundles);
    assert_eq!(pipeline.context().request_namespace(), Namespace::Obfuscated);

    let requested = pipeline.request("q").unwrap();
    let loaded = pipeline.load("main/MainApp", Namespace::Intermediate).unwrap();
    assert!(Arc::ptr_eq(&requested, &loaded));

    let defined = Mutex::new(Vec::new());
    let sink = |id: &str, _: Arc<[u8]>| {
        defined.lock().unwrap().push(id.to_string());
        Ok::<(), SourceError>(())
    };
    pipeline.deliver_requested("s", &sink).unwrap();
    assert_eq!(defined.into_inner().unwrap(), ["world/World"]);
}

#[test]
fn test_title_banner_appended() {
    let bundles = bundle_dir();
    let config = format!("{}{}", CONFIG, TITLE);
    let pipeline = start_with(&config, "1.7.2", &bundles);
    assert_eq!(pipeline.prepare().unwrap(), 2);

    let bytes = pipeline
        .load("basics/DisplayManager", Namespace::Intermediate)
        .unwrap();
    let unit = ClassUnit::decode(&bytes).unwrap();
    let create = unit.method(&MemberRef::new("createDisplay", "()V")).unwrap();
    assert_eq!(
        create.code,
        vec![
            Insn::ConstStr {
                value: "Host".to_string(),
            },
            Insn::ConstStr {
                value: title_suffix(pipeline.context().host()),
            },
            Insn::invoke(
                InvokeKind::Virtual,
                "java/lang/String",
                "concat",
                "(Ljava/lang/String;)Ljava/lang/String;",
            ),
            Insn::invoke(InvokeKind::Static, "org/lwjgl/opengl/Display", "setTitle", SET_TITLE),
            Insn::Return,
        ]
    );
    assert!(title_suffix(pipeline.context().host()).starts_with(" 1.7.2 - Weft "));
}

#[test]
fn test_source_sees_obfuscated_names() {
    struct Recording {
        inner: MemorySource,
        requests: Mutex<Vec<String>>,
    }

    impl UnitSource for Recording {
        fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, SourceError> {
            self.requests.lock().unwrap().push(id.to_string());
            self.inner.fetch(id)
        }
    }

    let bundles = bundle_dir();
    let source = Arc::new(Recording {
        inner: host_source("1.7.2"),
        requests: Mutex::new(Vec::new()),
    });
    let pipeline = Pipeline::start(
        LoaderConfig::from_str(CONFIG).unwrap(),
        MappingTable::load(MAPPINGS).unwrap(),
        bundles.path(),
        source.clone(),
    )
    .unwrap();
    pipeline.prepare().unwrap();

    assert_eq!(*source.requests.lock().unwrap(), ["q", "q"]);
}
