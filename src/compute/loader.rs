//! Module loader: fetch a plugin's module, instantiate it through the
//! configured [`ModuleFactory`], and keep the handle in the [`ModuleCache`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::Instrument;
use url::Url;

use super::cache::ModuleCache;
use super::error::ComputeError;
use super::module::{ModuleHandle, PluginModule};
use crate::config::Settings;
use crate::plugin::PluginDescriptor;

/// Retrieves module sources and auxiliary assets.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, ComputeError>;
}

/// `http(s)://` through reqwest, `file://` from the local filesystem.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ComputeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ComputeError::fetch("<client>", e))?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, ComputeError> {
        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ComputeError::fetch(url.as_str(), "not a local path"))?;
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| ComputeError::fetch(url.as_str(), e))?;
                Ok(Bytes::from(bytes))
            }
            "http" | "https" => {
                let resp = self
                    .http
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| ComputeError::fetch(url.as_str(), e))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ComputeError::fetch(url.as_str(), format!("status {status}")));
                }
                resp.bytes()
                    .await
                    .map_err(|e| ComputeError::fetch(url.as_str(), e))
            }
            other => Err(ComputeError::fetch(
                url.as_str(),
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}

/// Resolves a module's auxiliary assets relative to the directory the module
/// itself was fetched from, not the host's origin.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    base: Url,
}

impl AssetLocator {
    pub fn for_module(module_url: &Url) -> Self {
        // Url::join drops the last path segment, which is what we want here.
        let base = module_url.join("./").unwrap_or_else(|_| module_url.clone());
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn locate_file(&self, relative_path: &str) -> Result<Url, ComputeError> {
        self.base
            .join(relative_path)
            .map_err(|e| ComputeError::fetch(relative_path, e))
    }
}

/// What the factory gets besides the module source.
#[derive(Clone)]
pub struct FactoryOptions {
    /// Resolved location the source was fetched from.
    pub module_url: Url,
    pub locator: AssetLocator,
    pub assets: Arc<dyn ModuleFetcher>,
}

/// The one place a fetched module turns into something invocable.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    /// `source` is whatever `plugin.url` served. Errors are `EntryPointNotFound`
    /// or `InstantiationFailure`.
    async fn instantiate(
        &self,
        source: Bytes,
        entry_function: &str,
        options: FactoryOptions,
    ) -> Result<Box<dyn PluginModule>, ComputeError>;
}

pub struct ModuleLoader {
    fetcher: Arc<dyn ModuleFetcher>,
    factory: Arc<dyn ModuleFactory>,
    cache: Arc<ModuleCache>,
    base_url: Option<Url>,
}

impl ModuleLoader {
    pub fn new(
        fetcher: Arc<dyn ModuleFetcher>,
        factory: Arc<dyn ModuleFactory>,
        cache: Arc<ModuleCache>,
    ) -> Self {
        Self {
            fetcher,
            factory,
            cache,
            base_url: None,
        }
    }

    /// Base used for plugin URLs such as `/wasm/text-viewer.js`.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    /// Loader wired to the real network fetcher and the wasm runtime.
    pub fn from_settings(settings: &Settings) -> Result<Self, ComputeError> {
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_millis(settings.fetch_timeout_ms))?);
        let factory = super::runtime::default_factory(settings)?;
        let cache = Arc::new(ModuleCache::new(settings.module_cache_max));
        let mut loader = Self::new(fetcher, factory, cache);
        match Url::parse(&settings.plugin_base_url) {
            Ok(base) => loader = loader.with_base_url(base),
            Err(err) => tracing::warn!(
                target = "filepeek",
                base = %settings.plugin_base_url,
                error = %err,
                "ignoring invalid plugin base url"
            ),
        }
        Ok(loader)
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// Handle for `plugin`, instantiating it on first use. Idempotent per plugin id.
    pub async fn load(&self, plugin: &PluginDescriptor) -> Result<ModuleHandle, ComputeError> {
        if let Some(handle) = self.cache.get(&plugin.id) {
            return Ok(handle);
        }
        self.cache
            .get_or_load(&plugin.id, || self.instantiate(plugin))
            .await
    }

    async fn instantiate(&self, plugin: &PluginDescriptor) -> Result<ModuleHandle, ComputeError> {
        let span = tracing::info_span!("load_module", plugin = %plugin.id);
        self.instantiate_inner(plugin).instrument(span).await
    }

    async fn instantiate_inner(
        &self,
        plugin: &PluginDescriptor,
    ) -> Result<ModuleHandle, ComputeError> {
        let url = plugin
            .resolve_url(self.base_url.as_ref())
            .map_err(|e| ComputeError::fetch(plugin.url.as_str(), e))?;
        let started = std::time::Instant::now();
        let source = self.fetcher.fetch(&url).await?;
        let options = FactoryOptions {
            module_url: url.clone(),
            locator: AssetLocator::for_module(&url),
            assets: self.fetcher.clone(),
        };
        let module = self
            .factory
            .instantiate(source, &plugin.entry_function, options)
            .await?;
        let handle = ModuleHandle::new(plugin.id.clone(), module);
        tracing::info!(
            target = "filepeek",
            plugin = %plugin.id,
            url = %url,
            convention = %handle.convention(),
            duration_ms = started.elapsed().as_millis() as u64,
            "module loaded"
        );
        Ok(handle)
    }
}
