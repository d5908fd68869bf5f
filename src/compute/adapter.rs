//! Calling-convention adapter: feeds one file to a module through the
//! protocol chosen at probe time and parses what comes back.

use std::borrow::Cow;

use bytes::Bytes;
use chrono::Utc;

use super::error::{ComputeError, ModuleError};
use super::module::{CallingConvention, PluginModule};
use super::outcome::{parse_outcome, PluginOutcome};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// File content as handed to a module.
#[derive(Debug, Clone)]
pub struct FileContents {
    pub name: String,
    pub bytes: Bytes,
}

impl FileContents {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

pub fn invoke(
    module: &mut dyn PluginModule,
    convention: CallingConvention,
    file: &FileContents,
) -> Result<PluginOutcome, ComputeError> {
    tracing::debug!(
        target = "filepeek",
        convention = %convention,
        file = %file.name,
        bytes = file.bytes.len(),
        "invoking module"
    );
    let raw = match convention {
        CallingConvention::PathBased => call_with_path(module, file)?,
        CallingConvention::BufferBased => call_with_buffer(module, &file.bytes)?,
        CallingConvention::TextBased => module.process_text(&decode_text(&file.bytes))?,
        CallingConvention::Unsupported => return Err(ComputeError::UnsupportedModule),
    };
    parse_outcome(&raw)
}

/// Mount the file under a fresh `/work-<nanos>` directory and pass its path.
///
/// Mounts are left in place after the call; they live as long as the module.
fn call_with_path(module: &mut dyn PluginModule, file: &FileContents) -> Result<String, ComputeError> {
    let dir = mount_dir_name();
    if let Err(err) = module.make_dir(&dir) {
        // An existing directory is fine; a real problem surfaces at mount time.
        tracing::debug!(target = "filepeek", dir = %dir, error = %err, "mkdir ignored");
    }
    let name = mount_file_name(&file.name);
    module.mount_file(&dir, &name, &file.bytes)?;
    let path = format!("{dir}/{name}");
    Ok(module.process_file(&path)?)
}

fn call_with_buffer(module: &mut dyn PluginModule, bytes: &[u8]) -> Result<String, ComputeError> {
    let mut region = ScopedRegion::alloc(module, bytes.len())?;
    let ptr = region.ptr;
    region.module().write_memory(ptr, bytes)?;
    let out = region.module().process_binary(ptr, bytes.len())?;
    Ok(out)
}

/// UTF-8 decode the way a standard text decoder does: leading BOM dropped,
/// invalid sequences replaced with U+FFFD.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

fn mount_dir_name() -> String {
    let now = Utc::now();
    let stamp = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis().saturating_mul(1_000_000));
    format!("/work-{stamp}")
}

/// Last path component only; a blob name never escapes its mount directory.
fn mount_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    match base {
        "" | "." | ".." => "input".to_string(),
        other => other.to_string(),
    }
}

/// A region of module linear memory released on drop, whatever happened in between.
struct ScopedRegion<'m> {
    module: &'m mut dyn PluginModule,
    ptr: u32,
}

impl<'m> ScopedRegion<'m> {
    fn alloc(module: &'m mut dyn PluginModule, len: usize) -> Result<Self, ModuleError> {
        let ptr = module.alloc(len)?;
        Ok(Self { module, ptr })
    }

    fn module(&mut self) -> &mut (dyn PluginModule + 'm) {
        &mut *self.module
    }
}

impl Drop for ScopedRegion<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.module.free(self.ptr) {
            tracing::warn!(target = "filepeek", ptr = self.ptr, error = %err, "free failed");
        }
    }
}
