//! Real modules through the wasmtime runtime. Fixtures are WAT text, which
//! the runtime accepts alongside binary modules.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use url::Url;

use filepeek::compute::runtime::WasmFactory;
use filepeek::compute::{
    AssetLocator, CallingConvention, ComputeError, FactoryOptions, FileContents, HttpFetcher,
    ModuleCache, ModuleFactory, ModuleHandle, ModuleLoader, PluginOutcome,
};
use filepeek::{PluginDescriptor, Settings};

/// Bump allocator plus `process_binary`: success when the first byte is 'B'.
const BUFFER_MODULE: &str = r#"
(module
  (memory (export "memory") 2)
  (global $next (mut i32) (i32.const 4096))
  (data (i32.const 16) "{\"type\":\"success\",\"payload\":{\"first\":66}}\00")
  (data (i32.const 256) "{\"type\":\"error\",\"payload\":{\"message\":\"bad input\"}}\00")
  (func (export "createPlugin"))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $next))
    (global.set $next (i32.add (global.get $next) (i32.add (local.get $n) (i32.const 1))))
    (local.get $p))
  (func (export "free") (param i32))
  (func (export "process_binary") (param $ptr i32) (param $len i32) (result i32)
    (if (result i32) (i32.eqz (local.get $len))
      (then (i32.const 256))
      (else
        (if (result i32) (i32.eq (i32.load8_u (local.get $ptr)) (i32.const 66))
          (then (i32.const 16))
          (else (i32.const 256)))))))
"#;

/// `process` hands back the host's own NUL-terminated argument.
const TEXT_ECHO_MODULE: &str = r#"
(module
  (memory (export "memory") 2)
  (global $next (mut i32) (i32.const 4096))
  (func (export "createPlugin"))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $next))
    (global.set $next (i32.add (global.get $next) (i32.add (local.get $n) (i32.const 1))))
    (local.get $p))
  (func (export "free") (param i32))
  (func (export "process") (param $ptr i32) (param $len i32) (result i32)
    (local.get $ptr)))
"#;

/// Opens the mounted path through WASI and checks the first byte is 'P'.
const PATH_MODULE: &str = r#"
(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_read"
    (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 2)
  (global $next (mut i32) (i32.const 4096))
  (data (i32.const 16) "{\"type\":\"success\",\"payload\":{\"read\":true}}\00")
  (data (i32.const 256) "{\"type\":\"error\",\"payload\":{\"message\":\"read failed\"}}\00")
  (func (export "createPlugin"))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $next))
    (global.set $next (i32.add (global.get $next) (i32.add (local.get $n) (i32.const 1))))
    (local.get $p))
  (func (export "free") (param i32))
  (func (export "process_file") (param $ptr i32) (param $len i32) (result i32)
    ;; the root preopen is fd 3; skip the leading '/'
    (if (i32.ne
          (call $path_open (i32.const 3) (i32.const 0)
            (i32.add (local.get $ptr) (i32.const 1))
            (i32.sub (local.get $len) (i32.const 1))
            (i32.const 0) (i64.const 2) (i64.const 0) (i32.const 0) (i32.const 512))
          (i32.const 0))
      (then (return (i32.const 256))))
    (i32.store (i32.const 520) (i32.const 1024))
    (i32.store (i32.const 524) (i32.const 16))
    (if (i32.ne
          (call $fd_read (i32.load (i32.const 512)) (i32.const 520) (i32.const 1) (i32.const 528))
          (i32.const 0))
      (then (return (i32.const 256))))
    (if (result i32) (i32.eq (i32.load8_u (i32.const 1024)) (i32.const 80))
      (then (i32.const 16))
      (else (i32.const 256)))))
"#;

/// `malloc(0)` returns NULL, as C allows; an empty buffer is still processed.
const NULL_ON_EMPTY_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 4096))
  (data (i32.const 16) "{\"type\":\"success\",\"payload\":{\"len\":0}}\00")
  (data (i32.const 256) "{\"type\":\"error\",\"payload\":{\"message\":\"not empty\"}}\00")
  (func (export "createPlugin"))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (if (i32.eqz (local.get $n)) (then (return (i32.const 0))))
    (local.set $p (global.get $next))
    (global.set $next (i32.add (global.get $next) (local.get $n)))
    (local.get $p))
  (func (export "free") (param i32))
  (func (export "process_binary") (param $ptr i32) (param $len i32) (result i32)
    (if (result i32) (i32.eqz (local.get $len))
      (then (i32.const 16))
      (else (i32.const 256)))))
"#;

/// `process` traps on input starting with '!'; otherwise it reports whether
/// every earlier string copy was freed.
const FREE_COUNTING_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 4096))
  (global $live (mut i32) (i32.const 0))
  (data (i32.const 16) "{\"type\":\"success\",\"payload\":{\"freed\":true}}\00")
  (data (i32.const 256) "{\"type\":\"error\",\"payload\":{\"message\":\"leaked\"}}\00")
  (func (export "createPlugin"))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (local.set $p (global.get $next))
    (global.set $next (i32.add (global.get $next) (i32.add (local.get $n) (i32.const 1))))
    (local.get $p))
  (func (export "free") (param i32)
    (global.set $live (i32.sub (global.get $live) (i32.const 1))))
  (func (export "process") (param $ptr i32) (param $len i32) (result i32)
    (if (i32.eq (i32.load8_u (local.get $ptr)) (i32.const 33))
      (then unreachable))
    ;; only this call's own copy may still be live
    (if (result i32) (i32.eq (global.get $live) (i32.const 1))
      (then (i32.const 16))
      (else (i32.const 256)))))
"#;

const BARE_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "createPlugin")))
"#;

fn options() -> FactoryOptions {
    let url = Url::parse("http://plugins.test/wasm/fixture.wasm").unwrap();
    FactoryOptions {
        locator: AssetLocator::for_module(&url),
        module_url: url,
        assets: Arc::new(HttpFetcher::new(std::time::Duration::from_secs(1)).unwrap()),
    }
}

async fn instantiate(wat: &str, entry: &str) -> Result<ModuleHandle, ComputeError> {
    let factory = WasmFactory::new(&Settings::default())?;
    let module = factory
        .instantiate(Bytes::from(wat.to_string()), entry, options())
        .await?;
    Ok(ModuleHandle::new("fixture", module))
}

async fn invoke(handle: &ModuleHandle, file: FileContents) -> Result<PluginOutcome, ComputeError> {
    let handle = handle.clone();
    tokio::task::spawn_blocking(move || handle.invoke(&file)).await.unwrap()
}

#[tokio::test]
async fn buffer_module_sees_the_file_bytes() {
    let handle = instantiate(BUFFER_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::BufferBased);

    let ok = invoke(&handle, FileContents::new("a.bin", b"B\x00\x01".to_vec())).await.unwrap();
    assert_eq!(
        ok,
        PluginOutcome::Success(json!({"type": "success", "payload": {"first": 66}}))
    );

    let bad = invoke(&handle, FileContents::new("a.bin", b"Z".to_vec())).await.unwrap();
    assert_eq!(bad, PluginOutcome::Failure { message: "bad input".into() });

    let empty = invoke(&handle, FileContents::new("a.bin", Vec::new())).await.unwrap();
    assert!(matches!(empty, PluginOutcome::Failure { .. }));
}

#[tokio::test]
async fn empty_file_reaches_buffer_module_when_malloc_zero_is_null() {
    let handle = instantiate(NULL_ON_EMPTY_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::BufferBased);

    let out = invoke(&handle, FileContents::new("empty.bin", Vec::new())).await.unwrap();
    assert_eq!(out, PluginOutcome::Success(json!({"type": "success", "payload": {"len": 0}})));

    // a non-empty file still gets a real region
    let out = invoke(&handle, FileContents::new("one.bin", vec![1u8])).await.unwrap();
    assert_eq!(out, PluginOutcome::Failure { message: "not empty".into() });
}

#[tokio::test]
async fn text_copy_is_freed_even_when_the_module_traps() {
    let handle = instantiate(FREE_COUNTING_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::TextBased);

    for _ in 0..2 {
        let err = invoke(&handle, FileContents::new("a.txt", "!boom")).await.unwrap_err();
        assert!(matches!(err, ComputeError::Invocation(_)), "{err:?}");
    }
    let out = invoke(&handle, FileContents::new("a.txt", "fine")).await.unwrap();
    assert_eq!(out, PluginOutcome::Success(json!({"type": "success", "payload": {"freed": true}})));
}

#[tokio::test]
async fn text_module_receives_the_decoded_text_unchanged() {
    let handle = instantiate(TEXT_ECHO_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::TextBased);

    let body = json!({"type": "text", "payload": {"content": "héllo\n世界", "language": "plaintext"}});
    let out = invoke(&handle, FileContents::new("a.json", body.to_string().into_bytes()))
        .await
        .unwrap();
    assert_eq!(out, PluginOutcome::Success(body));

    let not_json = invoke(&handle, FileContents::new("a.txt", "plain words")).await.unwrap_err();
    assert!(matches!(not_json, ComputeError::MalformedResult(_)));
}

#[tokio::test]
async fn path_module_reads_the_mounted_file() {
    let handle = instantiate(PATH_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::PathBased);

    let out = invoke(&handle, FileContents::new("archive.zip", b"PK\x03\x04".to_vec()))
        .await
        .unwrap();
    assert_eq!(out, PluginOutcome::Success(json!({"type": "success", "payload": {"read": true}})));

    // each call mounts a fresh directory; earlier mounts stay in place
    let again = invoke(&handle, FileContents::new("archive.zip", b"PK".to_vec())).await.unwrap();
    assert!(matches!(again, PluginOutcome::Success(_)));
}

#[tokio::test]
async fn missing_entry_function_fails_instantiation() {
    let err = instantiate(BUFFER_MODULE, "createOtherPlugin").await.unwrap_err();
    assert_eq!(err, ComputeError::EntryPointNotFound("createOtherPlugin".into()));

    // exported, but not a function
    let err = instantiate(BUFFER_MODULE, "memory").await.unwrap_err();
    assert_eq!(err, ComputeError::EntryPointNotFound("memory".into()));
}

#[tokio::test]
async fn module_without_entry_points_is_unsupported() {
    let handle = instantiate(BARE_MODULE, "createPlugin").await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::Unsupported);
    let err = invoke(&handle, FileContents::new("a", "x")).await.unwrap_err();
    assert_eq!(err, ComputeError::UnsupportedModule);
}

#[tokio::test]
async fn garbage_source_is_an_instantiation_failure() {
    let factory = WasmFactory::new(&Settings::default()).unwrap();
    let err = factory
        .instantiate(Bytes::from_static(b"\0asm\x01\0\0\0garbage"), "createPlugin", options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ComputeError::InstantiationFailure(_)), "{err:?}");
}

#[tokio::test]
async fn loader_script_pulls_its_module_from_next_to_it() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("text-viewer.js"),
        "export default function createPlugin() {}",
    )
    .unwrap();
    std::fs::write(dir.path().join("text-viewer.wasm"), TEXT_ECHO_MODULE).unwrap();

    let settings = Settings::default();
    let loader = ModuleLoader::new(
        Arc::new(HttpFetcher::new(std::time::Duration::from_secs(1)).unwrap()),
        filepeek::compute::runtime::default_factory(&settings).unwrap(),
        Arc::new(ModuleCache::new(2)),
    );
    let script = Url::from_file_path(dir.path().join("text-viewer.js")).unwrap();
    let plugin = PluginDescriptor::new("text-viewer-v1", script.as_str(), "createPlugin");
    let handle = loader.load(&plugin).await.unwrap();
    assert_eq!(handle.convention(), CallingConvention::TextBased);
}
