//! What to show for a selected file, and how to read a plugin's result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin::{find_plugin, find_plugin_id_for_file, PluginDescriptor};

/// Viewer picked for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerChoice {
    /// Rendered natively; no worker round trip.
    Image,
    Plugin(PluginDescriptor),
    /// Streaming hex view, the fallback for anything unrecognized.
    Hex,
}

pub fn choose_viewer(file_name: &str, mime: &str, plugins: &[PluginDescriptor]) -> ViewerChoice {
    if mime.starts_with("image/") {
        return ViewerChoice::Image;
    }
    find_plugin_id_for_file(file_name)
        .and_then(|id| find_plugin(plugins, id))
        .map(|plugin| ViewerChoice::Plugin(plugin.clone()))
        .unwrap_or(ViewerChoice::Hex)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Files in this subtree, directories excluded.
    pub fn file_count(&self) -> usize {
        match (&self.kind, &self.children) {
            (NodeKind::File, _) => 1,
            (NodeKind::Directory, Some(children)) => children.iter().map(FileNode::file_count).sum(),
            (NodeKind::Directory, None) => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    content: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreePayload {
    root: FileNode,
}

/// A `RESULT` payload decoded for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewContent {
    Text { content: String, language: String },
    Tree { root: FileNode },
    /// Result type this host has no renderer for, or a payload that does not fit its type.
    Unknown(String),
}

pub fn decode_result(result: &Value) -> PreviewContent {
    let kind = result
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let payload = result.get("payload").cloned().unwrap_or(Value::Null);
    match kind.as_str() {
        "text" => match serde_json::from_value::<TextPayload>(payload) {
            Ok(text) => PreviewContent::Text {
                content: text.content,
                language: text.language.unwrap_or_else(|| "plaintext".to_string()),
            },
            Err(_) => PreviewContent::Unknown(kind),
        },
        "tree" => match serde_json::from_value::<TreePayload>(payload) {
            Ok(tree) => PreviewContent::Tree { root: tree.root },
            Err(_) => PreviewContent::Unknown(kind),
        },
        _ => PreviewContent::Unknown(kind),
    }
}

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human-readable size in powers of 1024, at most two decimals, trailing zeros dropped.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", SIZE_UNITS[unit])
}
