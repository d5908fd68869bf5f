//! Persisted plugin configuration.
//!
//! The record is a small JSON key-value file; the plugin list lives under
//! [`STORAGE_KEY`]. Writes replace the whole list, reads never fail: anything
//! unreadable is treated as "no user plugins".

use std::path::PathBuf;

use anyhow::Context;
use serde_json::{Map, Value};

use crate::plugin::PluginDescriptor;

pub const STORAGE_KEY: &str = "filepeek_plugins_config";

pub trait PluginConfigStore: Send + Sync {
    fn load(&self) -> Vec<PluginDescriptor>;
    fn save(&self, plugins: &[PluginDescriptor]) -> anyhow::Result<()>;
}

pub struct FilePluginStore {
    pub path: PathBuf,
}

impl FilePluginStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_record(&self) -> Map<String, Value> {
        let txt = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&txt) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

impl PluginConfigStore for FilePluginStore {
    fn load(&self) -> Vec<PluginDescriptor> {
        let record = self.read_record();
        let Some(stored) = record.get(STORAGE_KEY) else {
            return Vec::new();
        };
        match serde_json::from_value::<Vec<PluginDescriptor>>(stored.clone()) {
            Ok(plugins) => plugins,
            Err(err) => {
                tracing::warn!(
                    target = "filepeek",
                    path = %self.path.display(),
                    error = %err,
                    "stored plugin config is malformed; using empty list"
                );
                Vec::new()
            }
        }
    }

    fn save(&self, plugins: &[PluginDescriptor]) -> anyhow::Result<()> {
        let mut record = self.read_record();
        record.insert(
            STORAGE_KEY.to_string(),
            serde_json::to_value(plugins).context("serialize plugin config")?,
        );
        let text = serde_json::to_string_pretty(&Value::Object(record))
            .context("serialize plugin config record")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        // Write-then-rename keeps the record all-or-nothing.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Change a stored plugin's `url` and/or entry function in place, keeping
/// its id and list position. Returns the updated descriptor.
pub fn edit_plugin(
    store: &dyn PluginConfigStore,
    id: &str,
    url: Option<String>,
    entry_function: Option<String>,
) -> anyhow::Result<PluginDescriptor> {
    let mut plugins = store.load();
    let Some(plugin) = plugins.iter_mut().find(|p| p.id == id) else {
        anyhow::bail!("no user plugin '{id}'");
    };
    if let Some(url) = url {
        plugin.url = url;
    }
    if let Some(entry_function) = entry_function {
        plugin.entry_function = entry_function;
    }
    let updated = plugin.clone();
    store.save(&plugins)?;
    Ok(updated)
}
