//! Plugin descriptors, built-in defaults and extension routing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

/// Identifies a loadable plugin module. Immutable once handed to a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,
    /// Absolute URL, or a path resolved against the configured plugin base URL.
    pub url: String,
    /// Name of the factory export invoked once after instantiation.
    pub entry_function: String,
}

impl PluginDescriptor {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        entry_function: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            entry_function: entry_function.into(),
        }
    }

    /// Resolve `url` to an absolute location. Absolute URLs are kept as-is.
    pub fn resolve_url(&self, base: Option<&Url>) -> Result<Url, url::ParseError> {
        match Url::parse(&self.url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match base {
                Some(base) => base.join(&self.url),
                None => Err(url::ParseError::RelativeUrlWithoutBase),
            },
            Err(err) => Err(err),
        }
    }
}

pub const TEXT_VIEWER_ID: &str = "text-viewer-v1";

/// Plugins registered out of the box (prebuilt modules served next to the app).
pub fn default_plugins() -> Vec<PluginDescriptor> {
    vec![PluginDescriptor::new(
        TEXT_VIEWER_ID,
        "/wasm/text-viewer.js",
        "createTextViewerPlugin",
    )]
}

/// Extension (lower-case, no dot) to plugin id.
pub const EXTENSION_MAP: &[(&str, &str)] = &[
    ("txt", TEXT_VIEWER_ID),
    ("md", TEXT_VIEWER_ID),
    ("json", TEXT_VIEWER_ID),
    ("js", TEXT_VIEWER_ID),
    ("ts", TEXT_VIEWER_ID),
    ("tsx", TEXT_VIEWER_ID),
    ("cpp", TEXT_VIEWER_ID),
    ("hpp", TEXT_VIEWER_ID),
    ("log", TEXT_VIEWER_ID),
    ("csv", TEXT_VIEWER_ID),
];

/// Plugin id registered for the file's extension, if any.
///
/// A name without a dot is treated as its own extension, the way a plain
/// `split('.').pop()` would.
pub fn find_plugin_id_for_file(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    EXTENSION_MAP
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, id)| *id)
}

/// Images are rendered natively; everything else goes to the worker only when a plugin matches.
pub fn is_worker_required(file_name: &str, mime: &str) -> bool {
    if mime.starts_with("image/") {
        return false;
    }
    find_plugin_id_for_file(file_name).is_some()
}

/// Defaults first, then user entries; lookup returns the first match.
pub fn merge_with_defaults(user: Vec<PluginDescriptor>) -> Vec<PluginDescriptor> {
    let mut all = default_plugins();
    all.extend(user);
    all
}

pub fn find_plugin<'a>(plugins: &'a [PluginDescriptor], id: &str) -> Option<&'a PluginDescriptor> {
    plugins.iter().find(|p| p.id == id)
}

/// Fresh id for a user-entered plugin: `plugin_<millis>_<7 random chars>`.
pub fn generate_plugin_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("plugin_{}_{}", Utc::now().timestamp_millis(), &suffix[..7])
}
