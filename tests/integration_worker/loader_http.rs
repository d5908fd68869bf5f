//! Fetching modules over HTTP against a mock server.

use std::{sync::Arc, time::Duration};

use httpmock::prelude::*;
use url::Url;

use filepeek::compute::{ComputeError, HttpFetcher, ModuleCache, ModuleLoader};
use filepeek::{FileBlob, JobRequest, PluginDescriptor, Worker, WorkerMessage};

use super::support::ScriptedFactory;

fn loader_for(server: &MockServer) -> ModuleLoader {
    ModuleLoader::new(
        Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap()),
        Arc::new(ScriptedFactory::default()),
        Arc::new(ModuleCache::new(4)),
    )
    .with_base_url(Url::parse(&server.base_url()).unwrap())
}

#[tokio::test]
async fn module_is_fetched_once_across_jobs() {
    let server = MockServer::start_async().await;
    let module = server
        .mock_async(|when, then| {
            when.method(GET).path("/wasm/text-viewer.js");
            then.status(200).body("echo");
        })
        .await;

    let mut worker = Worker::spawn(Arc::new(loader_for(&server)));
    assert_eq!(worker.next_message().await, Some(WorkerMessage::Ready));
    let viewer = PluginDescriptor::new("text-viewer-v1", "/wasm/text-viewer.js", "createTextViewerPlugin");
    for _ in 0..3 {
        worker
            .submit(JobRequest::new(FileBlob::from_bytes("a.md", "# hi"), viewer.clone()))
            .await
            .unwrap();
        assert!(matches!(worker.next_message().await, Some(WorkerMessage::Result(_))));
    }
    worker.shutdown().await;
    module.assert_hits_async(1).await;
}

#[tokio::test]
async fn http_error_status_is_a_fetch_failure() {
    let server = MockServer::start_async().await;
    let missing = server
        .mock_async(|when, then| {
            when.method(GET).path("/wasm/nope.js");
            then.status(404);
        })
        .await;

    let loader = loader_for(&server);
    let err = loader
        .load(&PluginDescriptor::new("nope", "/wasm/nope.js", "create"))
        .await
        .unwrap_err();
    match err {
        ComputeError::FetchFailure { url, reason } => {
            assert!(url.ends_with("/wasm/nope.js"), "{url}");
            assert!(reason.contains("404"), "{reason}");
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
    missing.assert_hits_async(1).await;
}
