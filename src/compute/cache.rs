//! Per-plugin cache of instantiated modules.
//!
//! WHY: instantiation is the expensive step (fetch + compile), so handles are
//! reused across jobs. The cache is an owned object handed to the loader, not
//! a process-wide global; dropping it drops every instance.
//!
//! INVARIANT: at most one handle per plugin id. Concurrent requests for an id
//! that is still loading await the same in-flight load.
//! INVARIANT: a failed load leaves nothing behind; the next request retries.
//! INVARIANT: at most `capacity` initialized handles; the least recently used
//! one is dropped when a new load pushes the count over.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use super::error::ComputeError;
use super::module::ModuleHandle;

struct Slot {
    cell: OnceCell<ModuleHandle>,
    last_used: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            last_used: AtomicU64::new(0),
        }
    }
}

pub struct ModuleCache {
    slots: DashMap<String, Arc<Slot>>,
    capacity: usize,
    clock: AtomicU64,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached handle for `id`, if one finished loading.
    pub fn get(&self, id: &str) -> Option<ModuleHandle> {
        let slot = self.slots.get(id)?.clone();
        let handle = slot.cell.get()?.clone();
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        Some(handle)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots
            .get(id)
            .map(|slot| slot.cell.initialized())
            .unwrap_or(false)
    }

    /// Number of loaded handles (in-flight loads are not counted).
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the handle for `id`, running `load` only if nobody has loaded it
    /// yet and no load for it is in flight.
    pub async fn get_or_load<F, Fut>(&self, id: &str, load: F) -> Result<ModuleHandle, ComputeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModuleHandle, ComputeError>>,
    {
        let slot = self
            .slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone();
        slot.last_used.store(self.tick(), Ordering::Relaxed);

        match slot.cell.get_or_try_init(load).await {
            Ok(handle) => {
                let handle = handle.clone();
                self.evict_over_capacity(id);
                Ok(handle)
            }
            Err(err) => {
                self.slots
                    .remove_if(id, |_, s| Arc::ptr_eq(s, &slot) && !s.cell.initialized());
                Err(err)
            }
        }
    }

    /// Drop one plugin's handle; the next job for it reloads.
    pub fn invalidate(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    fn evict_over_capacity(&self, keep: &str) {
        loop {
            let loaded: Vec<(String, u64)> = self
                .slots
                .iter()
                .filter(|e| e.value().cell.initialized())
                .map(|e| (e.key().clone(), e.value().last_used.load(Ordering::Relaxed)))
                .collect();
            if loaded.len() <= self.capacity {
                return;
            }
            let victim = loaded
                .into_iter()
                .filter(|(id, _)| id != keep)
                .min_by_key(|(_, used)| *used)
                .map(|(id, _)| id);
            match victim {
                Some(id) => {
                    tracing::info!(target = "filepeek", plugin = %id, "evicting module from cache");
                    self.slots.remove(&id);
                }
                None => return,
            }
        }
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new(crate::config::limits::DEFAULT_MODULE_CACHE_MAX)
    }
}
