//! WebAssembly runtime behind the [`ModuleFactory`] seam.
//!
//! This module is compiled unconditionally and selects the implementation
//! based on the `wasm_compute` feature:
//! - when enabled, modules are compiled with Wasmtime and linked against
//!   WASI preview 1, each instance getting its own scratch directory as `/`.
//! - when disabled, every instantiation fails with a deterministic error so
//!   the worker protocol can still be driven end to end.
//!
//! Guest ABI (all pointers are offsets into the exported `memory`):
//! - `<entry_function>: () -> ()` runs once after instantiation.
//! - `malloc(len) -> ptr`, `free(ptr)` manage buffers the host writes into.
//! - `process_file(path_ptr, path_len) -> result_ptr` (needs WASI imports),
//!   `process_binary(ptr, len) -> result_ptr`, `process(text_ptr, text_len) -> result_ptr`.
//! - results are NUL-terminated UTF-8 JSON owned by the module; the host
//!   copies them out and never frees them.

use std::sync::Arc;

use super::error::ComputeError;
use super::loader::ModuleFactory;
use crate::config::Settings;

const WASM_MAGIC: &[u8] = b"\0asm";

/// True for a binary module or a text-format (`.wat`) one.
pub fn is_module_source(bytes: &[u8]) -> bool {
    if bytes.starts_with(WASM_MAGIC) {
        return true;
    }
    let text = bytes.trim_ascii_start();
    text.starts_with(b"(module") || text.starts_with(b";;")
}

#[cfg(feature = "wasm_compute")]
mod with_runtime {
    use std::path::Path;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;
    use wasmtime::{
        Config, Engine, Extern, Instance, Linker, Memory, Module, Store, StoreLimits,
        StoreLimitsBuilder, TypedFunc,
    };
    use wasmtime_wasi::p1::{self, WasiP1Ctx};
    use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

    use super::*;
    use crate::compute::error::ModuleError;
    use crate::compute::loader::FactoryOptions;
    use crate::compute::module::{Capabilities, PluginModule};
    use crate::config::limits::MAX_RESULT_BYTES;

    const WASI_MODULE: &str = "wasi_snapshot_preview1";

    /// Per-store host state.
    struct HostState {
        wasi: WasiP1Ctx,
        limits: StoreLimits,
    }

    #[derive(Clone)]
    pub struct WasmFactory {
        engine: Engine,
        memory_limit_bytes: usize,
        fuel: Option<u64>,
    }

    impl WasmFactory {
        pub fn new(settings: &Settings) -> Result<Self, ComputeError> {
            let mut cfg = Config::new();
            cfg.wasm_memory64(false);
            if settings.fuel.is_some() {
                cfg.consume_fuel(true);
            }
            let engine = Engine::new(&cfg)
                .map_err(|e| ComputeError::InstantiationFailure(format!("engine init: {e:#}")))?;
            let memory_limit_bytes = usize::try_from(settings.mem_limit_mb.saturating_mul(1024 * 1024))
                .unwrap_or(usize::MAX);
            Ok(Self {
                engine,
                memory_limit_bytes,
                fuel: settings.fuel,
            })
        }

        /// Resolve the bytes to compile. A non-module source is a loader
        /// script; its compiled payload sits next to it as `<stem>.wasm`.
        async fn module_bytes(
            &self,
            source: Bytes,
            options: &FactoryOptions,
        ) -> Result<Bytes, ComputeError> {
            if is_module_source(&source) {
                return Ok(source);
            }
            let stem = options
                .module_url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|file| Path::new(file).file_stem())
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .ok_or_else(|| {
                    ComputeError::InstantiationFailure(format!(
                        "cannot derive module payload name from {}",
                        options.module_url
                    ))
                })?;
            let payload_url = options.locator.locate_file(&format!("{stem}.wasm"))?;
            tracing::debug!(target = "filepeek", url = %payload_url, "fetching module payload");
            let payload = options.assets.fetch(&payload_url).await?;
            if !is_module_source(&payload) {
                return Err(ComputeError::InstantiationFailure(format!(
                    "{payload_url} is not a WebAssembly module"
                )));
            }
            Ok(payload)
        }

        fn instantiate_blocking(
            &self,
            bytes: &[u8],
            entry_function: &str,
        ) -> Result<WasmModule, ComputeError> {
            let module = Module::new(&self.engine, bytes)
                .map_err(|e| ComputeError::InstantiationFailure(format!("compile: {e:#}")))?;
            let has_wasi = module.imports().any(|import| import.module() == WASI_MODULE);

            // WHY: each instance gets a private root so mounts never collide across plugins.
            let scratch = TempDir::new()?;
            let mut builder = WasiCtxBuilder::new();
            builder
                .preopened_dir(scratch.path(), "/", DirPerms::all(), FilePerms::all())
                .map_err(|e| ComputeError::InstantiationFailure(format!("preopen: {e:#}")))?;
            let state = HostState {
                wasi: builder.build_p1(),
                limits: StoreLimitsBuilder::new()
                    .memory_size(self.memory_limit_bytes)
                    .build(),
            };

            let mut store = Store::new(&self.engine, state);
            store.limiter(|s| &mut s.limits);
            let mut linker: Linker<HostState> = Linker::new(&self.engine);
            if has_wasi {
                p1::add_to_linker_sync(&mut linker, |s: &mut HostState| &mut s.wasi)
                    .map_err(|e| ComputeError::InstantiationFailure(format!("link wasi: {e:#}")))?;
            }
            if let Some(fuel) = self.fuel {
                let _ = store.set_fuel(fuel);
            }
            let instance = linker
                .instantiate(&mut store, &module)
                .map_err(|e| ComputeError::InstantiationFailure(format!("instantiate: {e:#}")))?;

            // WASI reactors expect `_initialize` before anything else.
            if entry_function != "_initialize" {
                if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
                    init.call(&mut store, ()).map_err(|e| {
                        ComputeError::InstantiationFailure(format!("_initialize: {e:#}"))
                    })?;
                }
            }

            let entry = match instance.get_export(&mut store, entry_function) {
                Some(Extern::Func(func)) => func
                    .typed::<(), ()>(&store)
                    .map_err(|_| ComputeError::EntryPointNotFound(entry_function.to_string()))?,
                _ => return Err(ComputeError::EntryPointNotFound(entry_function.to_string())),
            };
            entry.call(&mut store, ()).map_err(|e| {
                ComputeError::InstantiationFailure(format!("{entry_function}: {e:#}"))
            })?;

            Ok(WasmModule::bind(store, instance, scratch, has_wasi, self.fuel))
        }
    }

    #[async_trait]
    impl ModuleFactory for WasmFactory {
        async fn instantiate(
            &self,
            source: Bytes,
            entry_function: &str,
            options: FactoryOptions,
        ) -> Result<Box<dyn PluginModule>, ComputeError> {
            let bytes = self.module_bytes(source, &options).await?;
            let factory = self.clone();
            let entry = entry_function.to_string();
            let module = tokio::task::spawn_blocking(move || {
                factory.instantiate_blocking(&bytes, &entry)
            })
            .await
            .map_err(|e| ComputeError::InstantiationFailure(format!("instantiation task: {e}")))??;
            Ok(Box::new(module))
        }
    }

    /// A live instance plus the exports the adapter may call.
    pub struct WasmModule {
        store: Store<HostState>,
        memory: Option<Memory>,
        malloc: Option<TypedFunc<i32, i32>>,
        free: Option<TypedFunc<i32, ()>>,
        process_file: Option<TypedFunc<(i32, i32), i32>>,
        process_binary: Option<TypedFunc<(i32, i32), i32>>,
        process: Option<TypedFunc<(i32, i32), i32>>,
        scratch: TempDir,
        has_wasi: bool,
        fuel: Option<u64>,
    }

    impl WasmModule {
        fn bind(
            mut store: Store<HostState>,
            instance: Instance,
            scratch: TempDir,
            has_wasi: bool,
            fuel: Option<u64>,
        ) -> Self {
            let memory = instance.get_memory(&mut store, "memory");
            let malloc = typed::<i32, i32>(&instance, &mut store, &["malloc", "_malloc"]);
            let free = typed::<i32, ()>(&instance, &mut store, &["free", "_free"]);
            let process_file = typed::<(i32, i32), i32>(&instance, &mut store, &["process_file"]);
            let process_binary =
                typed::<(i32, i32), i32>(&instance, &mut store, &["process_binary"]);
            let process = typed::<(i32, i32), i32>(&instance, &mut store, &["process"]);
            Self {
                store,
                memory,
                malloc,
                free,
                process_file,
                process_binary,
                process,
                scratch,
                has_wasi,
                fuel,
            }
        }

        fn has_linear_memory(&self) -> bool {
            self.memory.is_some() && self.malloc.is_some() && self.free.is_some()
        }

        fn refuel(&mut self) {
            if let Some(fuel) = self.fuel {
                let _ = self.store.set_fuel(fuel);
            }
        }

        fn memory(&self) -> Result<Memory, ModuleError> {
            self.memory.ok_or_else(|| ModuleError::missing("memory"))
        }

        /// Host path backing a guest directory under the scratch root.
        fn host_path(&self, guest: &str) -> std::path::PathBuf {
            self.scratch.path().join(guest.trim_start_matches('/'))
        }

        /// Copy `text` into guest memory with a trailing NUL and run `call`.
        /// The copy is freed on every exit path, unwinding included.
        fn with_guest_str(
            &mut self,
            text: &str,
            call: impl FnOnce(&mut Self, i32, i32) -> Result<i32, ModuleError>,
        ) -> Result<String, ModuleError> {
            let len = text.len();
            let size = len
                .checked_add(1)
                .ok_or_else(|| ModuleError::new(format!("{len} bytes exceed guest address space")))?;
            let ptr = self.alloc(size)?;
            let mut region = GuestString { module: self, ptr };
            let terminator = u32::try_from(len)
                .ok()
                .and_then(|n| ptr.checked_add(n))
                .ok_or_else(|| ModuleError::new(format!("{len} bytes at {ptr:#x} overflow guest memory")))?;
            region.module.write_memory(ptr, text.as_bytes())?;
            region.module.write_memory(terminator, &[0])?;
            let out = call(&mut *region.module, ptr as i32, guest_len(len)?)?;
            let result = region.module.read_result(out);
            drop(region);
            result
        }

        /// Copy out the NUL-terminated string the module returned.
        fn read_result(&mut self, ptr: i32) -> Result<String, ModuleError> {
            if ptr == 0 {
                return Err(ModuleError::new("entry point returned a null result"));
            }
            let memory = self.memory()?;
            let data = memory.data(&self.store);
            let start = ptr as u32 as usize;
            let tail = data
                .get(start..)
                .ok_or_else(|| ModuleError::new(format!("result pointer {start:#x} out of bounds")))?;
            let window = &tail[..tail.len().min(MAX_RESULT_BYTES)];
            let end = window
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| ModuleError::new("result string is not NUL-terminated"))?;
            String::from_utf8(window[..end].to_vec())
                .map_err(|_| ModuleError::new("result string is not valid UTF-8"))
        }
    }

    /// Host string copied into guest memory; freed when dropped.
    struct GuestString<'m> {
        module: &'m mut WasmModule,
        ptr: u32,
    }

    impl Drop for GuestString<'_> {
        fn drop(&mut self) {
            if let Err(err) = self.module.free(self.ptr) {
                tracing::warn!(target = "filepeek", ptr = self.ptr, error = %err, "free failed");
            }
        }
    }

    fn typed<P, R>(instance: &Instance, store: &mut Store<HostState>, names: &[&str]) -> Option<TypedFunc<P, R>>
    where
        P: wasmtime::WasmParams,
        R: wasmtime::WasmResults,
    {
        names.iter().find_map(|name| {
            match instance.get_typed_func::<P, R>(&mut *store, name) {
                Ok(func) => Some(func),
                Err(err) => {
                    if instance.get_export(&mut *store, name).is_some() {
                        tracing::debug!(target = "filepeek", export = name, error = %err, "export has unexpected signature");
                    }
                    None
                }
            }
        })
    }

    fn guest_len(len: usize) -> Result<i32, ModuleError> {
        i32::try_from(len).map_err(|_| ModuleError::new(format!("{len} bytes exceed guest address space")))
    }

    fn trap(export: &str, err: wasmtime::Error) -> ModuleError {
        ModuleError::new(format!("{export} trapped: {err:#}"))
    }

    impl PluginModule for WasmModule {
        fn capabilities(&self) -> Capabilities {
            let linear_memory = self.has_linear_memory();
            Capabilities {
                process_file: self.process_file.is_some() && linear_memory,
                fs_mount: self.has_wasi,
                process_binary: self.process_binary.is_some(),
                linear_memory,
                process_text: self.process.is_some() && linear_memory,
            }
        }

        fn make_dir(&mut self, dir: &str) -> Result<(), ModuleError> {
            std::fs::create_dir(self.host_path(dir)).map_err(|e| ModuleError::new(e.to_string()))
        }

        fn mount_file(&mut self, dir: &str, name: &str, bytes: &[u8]) -> Result<(), ModuleError> {
            let path = self.host_path(dir).join(name);
            std::fs::write(&path, bytes)
                .map_err(|e| ModuleError::new(format!("mount {}: {e}", path.display())))
        }

        fn process_file(&mut self, path: &str) -> Result<String, ModuleError> {
            let func = self.process_file.clone().ok_or_else(|| ModuleError::missing("process_file"))?;
            self.with_guest_str(path, move |m, ptr, len| {
                m.refuel();
                func.call(&mut m.store, (ptr, len)).map_err(|e| trap("process_file", e))
            })
        }

        fn alloc(&mut self, len: usize) -> Result<u32, ModuleError> {
            let malloc = self.malloc.clone().ok_or_else(|| ModuleError::missing("malloc"))?;
            let size = guest_len(len)?;
            self.refuel();
            let ptr = malloc.call(&mut self.store, size).map_err(|e| trap("malloc", e))?;
            // malloc(0) may legitimately return NULL.
            if ptr == 0 && len > 0 {
                return Err(ModuleError::new(format!("malloc({len}) returned null")));
            }
            Ok(ptr as u32)
        }

        fn free(&mut self, ptr: u32) -> Result<(), ModuleError> {
            let free = self.free.clone().ok_or_else(|| ModuleError::missing("free"))?;
            self.refuel();
            free.call(&mut self.store, ptr as i32).map_err(|e| trap("free", e))
        }

        fn write_memory(&mut self, ptr: u32, bytes: &[u8]) -> Result<(), ModuleError> {
            let memory = self.memory()?;
            memory
                .write(&mut self.store, ptr as usize, bytes)
                .map_err(|e| ModuleError::new(format!("write at {ptr:#x}: {e}")))
        }

        fn process_binary(&mut self, ptr: u32, len: usize) -> Result<String, ModuleError> {
            let func = self.process_binary.clone().ok_or_else(|| ModuleError::missing("process_binary"))?;
            let len = guest_len(len)?;
            self.refuel();
            let out = func
                .call(&mut self.store, (ptr as i32, len))
                .map_err(|e| trap("process_binary", e))?;
            self.read_result(out)
        }

        fn process_text(&mut self, text: &str) -> Result<String, ModuleError> {
            let func = self.process.clone().ok_or_else(|| ModuleError::missing("process"))?;
            self.with_guest_str(text, move |m, ptr, len| {
                m.refuel();
                func.call(&mut m.store, (ptr, len)).map_err(|e| trap("process", e))
            })
        }
    }
}

#[cfg(not(feature = "wasm_compute"))]
mod no_runtime {
    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::compute::loader::FactoryOptions;
    use crate::compute::module::PluginModule;

    /// Stands in for the runtime when it is compiled out.
    pub struct NoRuntimeFactory;

    #[async_trait]
    impl ModuleFactory for NoRuntimeFactory {
        async fn instantiate(
            &self,
            _source: Bytes,
            _entry_function: &str,
            _options: FactoryOptions,
        ) -> Result<Box<dyn PluginModule>, ComputeError> {
            Err(ComputeError::InstantiationFailure(
                "Wasm runtime not enabled (feature wasm_compute)".into(),
            ))
        }
    }
}

#[cfg(feature = "wasm_compute")]
pub use with_runtime::{WasmFactory, WasmModule};

#[cfg(not(feature = "wasm_compute"))]
pub use no_runtime::NoRuntimeFactory;

/// Factory selected by the `wasm_compute` feature.
pub fn default_factory(settings: &Settings) -> Result<Arc<dyn ModuleFactory>, ComputeError> {
    #[cfg(feature = "wasm_compute")]
    {
        Ok(Arc::new(WasmFactory::new(settings)?))
    }
    #[cfg(not(feature = "wasm_compute"))]
    {
        let _ = settings;
        Ok(Arc::new(NoRuntimeFactory))
    }
}
