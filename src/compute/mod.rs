//! Plugin execution: fetch, instantiate, cache and invoke analysis modules.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod loader;
pub mod module;
pub mod outcome;
pub mod runtime;

pub use adapter::FileContents;
pub use cache::ModuleCache;
pub use error::{ComputeError, ModuleError};
pub use loader::{AssetLocator, FactoryOptions, HttpFetcher, ModuleFactory, ModuleFetcher, ModuleLoader};
pub use module::{Capabilities, CallingConvention, ModuleHandle, PluginModule};
pub use outcome::PluginOutcome;
