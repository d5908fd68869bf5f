//! Host-side view of an instantiated plugin module.
//!
//! A module is probed once after instantiation; the resulting
//! [`CallingConvention`] is stored on the handle so call sites never re-check
//! optional exports.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::adapter::{self, FileContents};
use super::error::{ComputeError, ModuleError};
use super::outcome::PluginOutcome;

/// Entry points and host services a module exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub process_file: bool,
    /// The module can see host files mounted into its virtual filesystem.
    pub fs_mount: bool,
    pub process_binary: bool,
    /// allocate / free / byte-addressable memory view.
    pub linear_memory: bool,
    pub process_text: bool,
}

/// Invocation protocol chosen for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    PathBased,
    BufferBased,
    TextBased,
    Unsupported,
}

impl CallingConvention {
    /// INVARIANT: priority is path > buffer > text. Modules that need random
    /// access get the filesystem even when they could also take a buffer.
    pub fn probe(caps: Capabilities) -> Self {
        if caps.process_file && caps.fs_mount {
            Self::PathBased
        } else if caps.process_binary && caps.linear_memory {
            Self::BufferBased
        } else if caps.process_text {
            Self::TextBased
        } else {
            Self::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathBased => "path",
            Self::BufferBased => "buffer",
            Self::TextBased => "text",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instantiated, stateful plugin module.
///
/// Implementations only provide the entry points they actually have; the
/// defaults report the export as missing.
pub trait PluginModule: Send {
    fn capabilities(&self) -> Capabilities;

    fn make_dir(&mut self, dir: &str) -> Result<(), ModuleError> {
        let _ = dir;
        Err(ModuleError::missing("filesystem"))
    }

    /// Expose `bytes` as `<dir>/<name>` inside the module's filesystem.
    fn mount_file(&mut self, dir: &str, name: &str, bytes: &[u8]) -> Result<(), ModuleError> {
        let _ = (dir, name, bytes);
        Err(ModuleError::missing("filesystem"))
    }

    fn process_file(&mut self, path: &str) -> Result<String, ModuleError> {
        let _ = path;
        Err(ModuleError::missing("process_file"))
    }

    fn alloc(&mut self, len: usize) -> Result<u32, ModuleError> {
        let _ = len;
        Err(ModuleError::missing("malloc"))
    }

    fn free(&mut self, ptr: u32) -> Result<(), ModuleError> {
        let _ = ptr;
        Err(ModuleError::missing("free"))
    }

    fn write_memory(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), ModuleError> {
        let _ = (ptr, bytes);
        Err(ModuleError::missing("memory"))
    }

    fn process_binary(&mut self, ptr: u32, len: usize) -> Result<String, ModuleError> {
        let _ = (ptr, len);
        Err(ModuleError::missing("process_binary"))
    }

    fn process_text(&mut self, text: &str) -> Result<String, ModuleError> {
        let _ = text;
        Err(ModuleError::missing("process"))
    }
}

struct HandleInner {
    plugin_id: String,
    convention: CallingConvention,
    module: Mutex<Box<dyn PluginModule>>,
}

/// Shared handle to a cached module instance.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("plugin_id", &self.inner.plugin_id)
            .field("convention", &self.inner.convention)
            .finish()
    }
}

impl ModuleHandle {
    pub fn new(plugin_id: impl Into<String>, module: Box<dyn PluginModule>) -> Self {
        let convention = CallingConvention::probe(module.capabilities());
        Self {
            inner: Arc::new(HandleInner {
                plugin_id: plugin_id.into(),
                convention,
                module: Mutex::new(module),
            }),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    pub fn convention(&self) -> CallingConvention {
        self.inner.convention
    }

    /// True when both handles point at the same instance.
    pub fn same_instance(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the module on `file`. Blocks for the duration of the call; one
    /// invocation per instance at a time.
    pub fn invoke(&self, file: &FileContents) -> Result<PluginOutcome, ComputeError> {
        let mut module = self.inner.module.lock();
        adapter::invoke(module.as_mut(), self.inner.convention, file)
    }
}
