//! Configuration constants and runtime settings
//!
//! Constants live in `limits` and `errors`; `Settings` gathers the values that
//! can be overridden from the environment (or a `.env` file loaded by the binary).

pub mod errors;
pub mod limits;

use std::path::PathBuf;

use dirs::data_dir;
use once_cell::sync::Lazy;

use self::limits::{
    DEFAULT_CHUNK_CACHE_MAX, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MEMORY_LIMIT_MB,
    DEFAULT_MODULE_CACHE_MAX,
};

pub static APP_NAME: &str = "filepeek";
pub static PLUGIN_BASE_URL_DEFAULT: &str = "http://127.0.0.1:8080/";

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var("FILEPEEK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_NAME)
});

/// Location of the plugin configuration record.
pub fn plugins_config_path() -> PathBuf {
    DATA_DIR.join("plugins.json")
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base used to resolve plugin URLs that are not absolute (e.g. `/wasm/text-viewer.js`).
    pub plugin_base_url: String,
    pub module_cache_max: usize,
    pub chunk_cache_max: usize,
    pub fetch_timeout_ms: u64,
    pub mem_limit_mb: u64,
    /// Fuel per invocation; `None` leaves execution unmetered.
    pub fuel: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            plugin_base_url: PLUGIN_BASE_URL_DEFAULT.to_string(),
            module_cache_max: DEFAULT_MODULE_CACHE_MAX,
            chunk_cache_max: DEFAULT_CHUNK_CACHE_MAX,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            mem_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            fuel: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - FILEPEEK_PLUGIN_BASE_URL: base for relative plugin URLs (default: http://127.0.0.1:8080/)
    /// - FILEPEEK_MODULE_CACHE_MAX: instantiated modules kept alive (default: 16)
    /// - FILEPEEK_CHUNK_CACHE_MAX: 64 KiB chunks kept by the hex viewer (default: 256)
    /// - FILEPEEK_FETCH_TIMEOUT_MS: module fetch timeout (default: 30000)
    /// - FILEPEEK_MEM_LIMIT_MB: linear memory ceiling per module (default: 256)
    /// - FILEPEEK_FUEL: fuel per invocation (default: unmetered)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let defaults = Self::default();
        Self {
            plugin_base_url: lookup("FILEPEEK_PLUGIN_BASE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.plugin_base_url),
            module_cache_max: parse("FILEPEEK_MODULE_CACHE_MAX")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.module_cache_max),
            chunk_cache_max: parse("FILEPEEK_CHUNK_CACHE_MAX")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.chunk_cache_max),
            fetch_timeout_ms: parse("FILEPEEK_FETCH_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.fetch_timeout_ms),
            mem_limit_mb: parse("FILEPEEK_MEM_LIMIT_MB")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.mem_limit_mb),
            fuel: parse("FILEPEEK_FUEL").and_then(|v| v.parse().ok()),
        }
    }
}
