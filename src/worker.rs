//! Worker control loop: receives (file, plugin) jobs, drives the loader and
//! the adapter, and posts back a typed message per job.
//!
//! INVARIANT: jobs are processed strictly one at a time, in arrival order.
//! INVARIANT: no job can take the loop down; every failure becomes `ERROR`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::compute::{ComputeError, FileContents, ModuleLoader, PluginOutcome};
use crate::config::limits::{EVENT_QUEUE_DEPTH, JOB_QUEUE_DEPTH};
use crate::plugin::PluginDescriptor;
use crate::source::FileBlob;

/// One-shot request. Both fields are optional on the wire; absence is reported, not assumed.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub file: Option<FileBlob>,
    pub plugin: Option<PluginDescriptor>,
}

impl JobRequest {
    pub fn new(file: FileBlob, plugin: PluginDescriptor) -> Self {
        Self {
            file: Some(file),
            plugin: Some(plugin),
        }
    }
}

/// Message posted back to whoever submitted jobs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Ready,
    Result(Value),
    Error(String),
}

/// `{ "type": ..., "payload": ... }` as it crosses the boundary.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Result(_) => "RESULT",
            Self::Error(_) => "ERROR",
        }
    }

    fn to_wire(&self) -> WireMessage {
        let payload = match self {
            Self::Ready => Value::Null,
            Self::Result(value) => value.clone(),
            Self::Error(message) => Value::String(message.clone()),
        };
        WireMessage {
            kind: self.kind().to_string(),
            payload,
        }
    }
}

impl Serialize for WorkerMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WorkerMessage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireMessage::deserialize(deserializer)?;
        match wire.kind.as_str() {
            "READY" => Ok(Self::Ready),
            "RESULT" => Ok(Self::Result(wire.payload)),
            "ERROR" => match wire.payload {
                Value::String(message) => Ok(Self::Error(message)),
                other => Ok(Self::Error(other.to_string())),
            },
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["READY", "RESULT", "ERROR"],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, thiserror::Error)]
#[error("worker has stopped")]
pub struct WorkerClosed;

/// Owning side of a running worker.
pub struct WorkerHandle {
    jobs: mpsc::Sender<JobRequest>,
    events: mpsc::Receiver<WorkerMessage>,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn submit(&self, job: JobRequest) -> Result<(), WorkerClosed> {
        self.jobs.send(job).await.map_err(|_| WorkerClosed)
    }

    /// Another sender for the same queue.
    pub fn sender(&self) -> mpsc::Sender<JobRequest> {
        self.jobs.clone()
    }

    /// Next posted message; `None` once the worker has stopped and drained.
    pub async fn next_message(&mut self) -> Option<WorkerMessage> {
        self.events.recv().await
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Close the queue and wait for in-flight work; the module cache goes with the loop.
    pub async fn shutdown(self) {
        let Self { jobs, events, task, .. } = self;
        drop(jobs);
        drop(events);
        if let Err(err) = task.await {
            tracing::warn!(target = "filepeek", error = %err, "worker task ended abnormally");
        }
    }
}

pub struct Worker {
    loader: Arc<ModuleLoader>,
    events: mpsc::Sender<WorkerMessage>,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn spawn(loader: Arc<ModuleLoader>) -> WorkerHandle {
        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
        let worker = Worker {
            loader,
            events: events_tx,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(jobs_rx).instrument(tracing::info_span!("worker")));
        WorkerHandle {
            jobs: jobs_tx,
            events: events_rx,
            state: state_rx,
            task,
        }
    }

    async fn run(self, mut jobs: mpsc::Receiver<JobRequest>) {
        self.state.send_replace(WorkerState::Loading);
        // READY signals the loop is live; modules still load lazily per job.
        self.state.send_replace(WorkerState::Ready);
        self.post(WorkerMessage::Ready).await;
        tracing::info!(target = "filepeek", "worker ready");

        while let Some(job) = jobs.recv().await {
            let message = match self.handle_job(job).await {
                Ok(payload) => WorkerMessage::Result(payload),
                Err(err @ ComputeError::ModuleReported(_)) => {
                    tracing::info!(target = "filepeek", code = err.code(), message = %err, "module reported error");
                    WorkerMessage::Error(err.to_string())
                }
                Err(err) => {
                    tracing::warn!(target = "filepeek", code = err.code(), error = %err, "job failed");
                    WorkerMessage::Error(err.to_string())
                }
            };
            self.post(message).await;
        }
        tracing::info!(target = "filepeek", cached = self.loader.cache().len(), "worker stopped");
    }

    async fn post(&self, message: WorkerMessage) {
        if self.events.send(message).await.is_err() {
            tracing::debug!(target = "filepeek", "message dropped; no receiver");
        }
    }

    async fn handle_job(&self, job: JobRequest) -> Result<Value, ComputeError> {
        let plugin = job.plugin.ok_or(ComputeError::MissingPluginConfig)?;
        let file = job.file.ok_or(ComputeError::MissingFile)?;
        let span = tracing::info_span!("job", plugin = %plugin.id, file = %file.name);
        async move {
            let handle = self.loader.load(&plugin).await?;
            let contents = FileContents::new(file.name.clone(), file.read_all().await?);
            let started = std::time::Instant::now();
            let outcome = tokio::task::spawn_blocking(move || handle.invoke(&contents))
                .await
                .map_err(|e| ComputeError::Invocation(format!("invocation aborted: {e}")))??;
            tracing::debug!(
                target = "filepeek",
                duration_ms = started.elapsed().as_millis() as u64,
                "job finished"
            );
            match outcome {
                PluginOutcome::Success(payload) => Ok(payload),
                PluginOutcome::Failure { message } => Err(ComputeError::ModuleReported(message)),
            }
        }
        .instrument(span)
        .await
    }
}
