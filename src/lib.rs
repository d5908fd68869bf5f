//! filepeek: a file preview host. Analysis plugins are WebAssembly modules
//! fetched on demand and driven by a worker loop; files no plugin claims are
//! shown in a streaming hex view that reads 64 KiB chunks as they scroll in.

pub mod compute;
pub mod config;
pub mod plugin;
pub mod plugin_store;
pub mod preview;
pub mod source;
pub mod telemetry;
pub mod viewer;
pub mod worker;

pub use compute::{ComputeError, ModuleLoader};
pub use config::Settings;
pub use plugin::PluginDescriptor;
pub use source::{FileBlob, RangeSource};
pub use worker::{JobRequest, Worker, WorkerHandle, WorkerMessage, WorkerState};
