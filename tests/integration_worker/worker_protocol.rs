//! Message protocol of the worker loop, driven through scripted modules.

use std::time::Duration;

use serde_json::json;

use filepeek::{FileBlob, JobRequest, PluginDescriptor, Worker, WorkerHandle, WorkerMessage, WorkerState};

use super::support::{plugin, rig};

async fn next(worker: &mut WorkerHandle) -> WorkerMessage {
    tokio::time::timeout(Duration::from_secs(5), worker.next_message())
        .await
        .expect("worker replied in time")
        .expect("worker still running")
}

async fn started(worker: &mut WorkerHandle) {
    assert_eq!(next(worker).await, WorkerMessage::Ready);
}

#[tokio::test]
async fn ready_is_posted_before_any_job() {
    let rig = rig();
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;
    assert_eq!(worker.state(), WorkerState::Ready);
    assert_eq!(rig.fetcher.fetches(), 0);
    worker.shutdown().await;
}

#[tokio::test]
async fn missing_plugin_is_reported_without_fetching() {
    let rig = rig();
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;

    worker
        .submit(JobRequest {
            file: Some(FileBlob::from_bytes("a.txt", "hi")),
            plugin: None,
        })
        .await
        .unwrap();
    assert_eq!(
        next(&mut worker).await,
        WorkerMessage::Error("No plugin configuration provided".into())
    );
    assert_eq!(rig.fetcher.fetches(), 0);
    assert_eq!(worker.state(), WorkerState::Ready);
    worker.shutdown().await;
}

#[tokio::test]
async fn missing_file_is_reported() {
    let rig = rig();
    rig.fetcher.serve("/wasm/echo.js", "echo");
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;

    worker
        .submit(JobRequest {
            file: None,
            plugin: Some(plugin("echo", "/wasm/echo.js")),
        })
        .await
        .unwrap();
    assert_eq!(next(&mut worker).await, WorkerMessage::Error("No file provided".into()));
    worker.shutdown().await;
}

#[tokio::test]
async fn module_error_result_is_forwarded_verbatim() {
    let rig = rig();
    rig.fetcher.serve(
        "/wasm/strict.js",
        r#"{"type":"error","payload":{"message":"bad input"}}"#,
    );
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;

    worker
        .submit(JobRequest::new(
            FileBlob::from_bytes("a.txt", "whatever"),
            plugin("strict", "/wasm/strict.js"),
        ))
        .await
        .unwrap();
    assert_eq!(next(&mut worker).await, WorkerMessage::Error("bad input".into()));
    worker.shutdown().await;
}

#[tokio::test]
async fn result_carries_the_tagged_object_and_module_is_loaded_once() {
    let rig = rig();
    rig.fetcher.serve("/wasm/echo.js", "echo");
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;

    let echo = plugin("echo", "/wasm/echo.js");
    for text in ["first", "zweite äöü"] {
        worker
            .submit(JobRequest::new(FileBlob::from_bytes("notes.txt", text), echo.clone()))
            .await
            .unwrap();
        assert_eq!(
            next(&mut worker).await,
            WorkerMessage::Result(json!({
                "type": "text",
                "payload": {"content": text, "language": "plaintext"}
            }))
        );
    }
    assert_eq!(rig.fetcher.fetches(), 1);
    assert_eq!(rig.factory.instantiations.load(std::sync::atomic::Ordering::SeqCst), 1);
    worker.shutdown().await;
}

#[tokio::test]
async fn queued_jobs_are_answered_in_order() {
    let rig = rig();
    rig.fetcher.serve("/wasm/echo.js", "echo");
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;

    let echo = plugin("echo", "/wasm/echo.js");
    for i in 0..5 {
        worker
            .submit(JobRequest::new(FileBlob::from_bytes("n.txt", format!("job {i}")), echo.clone()))
            .await
            .unwrap();
    }
    for i in 0..5 {
        match next(&mut worker).await {
            WorkerMessage::Result(value) => {
                assert_eq!(value["payload"]["content"], json!(format!("job {i}")))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    // two loads racing for one id would have fetched twice
    assert_eq!(rig.fetcher.fetches(), 1);
    worker.shutdown().await;
}

#[tokio::test]
async fn failures_never_stop_the_loop() {
    let rig = rig();
    rig.fetcher.serve("/wasm/echo.js", "echo");
    rig.fetcher.serve("/wasm/panic.js", "panic");
    rig.fetcher.serve("/wasm/trap.js", "trap");
    rig.fetcher.serve("/wasm/html.js", "<html>oops</html>");
    let mut worker = Worker::spawn(rig.loader.clone());
    started(&mut worker).await;
    let file = || FileBlob::from_bytes("a.txt", "x");

    let cases = [
        (plugin("gone", "/wasm/gone.js"), "Plugin.FetchFailed"),
        (PluginDescriptor::new("nofactory", "/wasm/echo.js", "missing"), "Plugin.EntryPointNotFound"),
        (plugin("panic", "/wasm/panic.js"), "Runtime.Fault"),
        (plugin("trap", "/wasm/trap.js"), "Runtime.Fault"),
        (plugin("html", "/wasm/html.js"), "Plugin.MalformedResult"),
    ];
    for (descriptor, code) in cases {
        worker.submit(JobRequest::new(file(), descriptor)).await.unwrap();
        match next(&mut worker).await {
            WorkerMessage::Error(message) => {
                assert!(message.starts_with(code), "expected {code}, got {message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    worker
        .submit(JobRequest::new(file(), plugin("echo", "/wasm/echo.js")))
        .await
        .unwrap();
    assert!(matches!(next(&mut worker).await, WorkerMessage::Result(_)));
    worker.shutdown().await;
}
