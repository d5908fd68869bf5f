//! Chunked, bounded cache of file bytes for the streaming viewer.
//!
//! INVARIANT: chunk `i` covers bytes `[i * 65536, (i + 1) * 65536)`; only the
//! file's last chunk may be shorter.
//! INVARIANT: chunks fetched for a previous source are never merged.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use futures_util::future::try_join_all;
use parking_lot::Mutex;

use super::hex::{chunk_index_for_row, offset_in_chunk};
use super::ViewerError;
use crate::config::limits::{BYTES_PER_ROW, CHUNK_SIZE, DEFAULT_CHUNK_CACHE_MAX};
use crate::source::RangeSource;

struct Entry {
    bytes: Bytes,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    source: Option<Arc<dyn RangeSource>>,
    generation: u64,
    chunks: HashMap<u64, Entry>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

pub struct ChunkCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Switch to another file (or none). Cached chunks are dropped wholesale.
    pub fn set_source(&self, source: Option<Arc<dyn RangeSource>>) {
        let mut inner = self.inner.lock();
        inner.source = source;
        inner.generation += 1;
        inner.chunks.clear();
    }

    pub fn file_len(&self) -> u64 {
        self.inner.lock().source.as_ref().map_or(0, |s| s.len())
    }

    /// Index of the file's last chunk, `None` for an empty or absent file.
    pub fn last_chunk_index(&self) -> Option<u64> {
        match self.file_len() {
            0 => None,
            len => Some((len - 1) / CHUNK_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: u64) -> bool {
        self.inner.lock().chunks.contains_key(&index)
    }

    /// Indices currently cached, ascending.
    pub fn cached_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.inner.lock().chunks.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn chunk(&self, index: u64) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let entry = inner.chunks.get_mut(&index)?;
        entry.last_used = now;
        Some(entry.bytes.clone())
    }

    /// Bytes of `row` (up to 16) if its chunk is cached. Empty past end of file.
    pub fn row_bytes(&self, row: u64) -> Option<Bytes> {
        let chunk = self.chunk(chunk_index_for_row(row))?;
        let start = offset_in_chunk(row).min(chunk.len());
        let end = (start + BYTES_PER_ROW as usize).min(chunk.len());
        Some(chunk.slice(start..end))
    }

    /// Make sure every chunk overlapping rows `start_row..=end_row` is cached.
    ///
    /// Only absent chunks are read, concurrently. Returns how many chunks
    /// were fetched and merged.
    pub async fn ensure_range(&self, start_row: u64, end_row: u64) -> Result<usize, ViewerError> {
        let (start_row, end_row) = if start_row <= end_row {
            (start_row, end_row)
        } else {
            (end_row, start_row)
        };
        let Some(last_chunk) = self.last_chunk_index() else {
            return Ok(0);
        };
        let first = chunk_index_for_row(start_row);
        if first > last_chunk {
            return Ok(0);
        }
        let last = chunk_index_for_row(end_row).min(last_chunk);

        let (source, generation, missing) = {
            let mut inner = self.inner.lock();
            let Some(source) = inner.source.clone() else {
                return Ok(0);
            };
            let now = inner.tick();
            let mut missing = Vec::new();
            for index in first..=last {
                match inner.chunks.get_mut(&index) {
                    Some(entry) => entry.last_used = now,
                    None => missing.push(index),
                }
            }
            (source, inner.generation, missing)
        };
        if missing.is_empty() {
            return Ok(0);
        }

        tracing::debug!(target = "filepeek", first, last, fetching = missing.len(), "loading chunks");
        let fetched = try_join_all(missing.into_iter().map(|index| {
            let source = source.clone();
            async move {
                let bytes = source
                    .read_range(index * CHUNK_SIZE, CHUNK_SIZE as usize)
                    .await?;
                Ok::<_, ViewerError>((index, bytes))
            }
        }))
        .await?;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!(target = "filepeek", "discarding chunks read for a previous file");
            return Ok(0);
        }
        let count = fetched.len();
        let now = inner.tick();
        for (index, bytes) in fetched {
            inner.chunks.insert(index, Entry { bytes, last_used: now });
        }
        self.evict_over_capacity(&mut inner, first..=last);
        Ok(count)
    }

    fn evict_over_capacity(&self, inner: &mut Inner, keep: std::ops::RangeInclusive<u64>) {
        while inner.chunks.len() > self.capacity {
            let victim = inner
                .chunks
                .iter()
                .filter(|(index, _)| !keep.contains(index))
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(index, _)| *index);
            match victim {
                Some(index) => {
                    inner.chunks.remove(&index);
                }
                None => return,
            }
        }
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CACHE_MAX)
    }
}
