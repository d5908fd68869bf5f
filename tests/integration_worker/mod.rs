//! Worker-level coverage. Most suites run against scripted modules; the
//! `wasm_runtime` suite compiles real WAT modules and needs `wasm_compute`.

mod loader_http;
#[cfg(feature = "wasm_compute")]
mod wasm_runtime;
mod worker_protocol;
