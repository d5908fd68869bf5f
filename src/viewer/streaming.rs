//! Turns visible-range changes into chunk loads and rows into text.

use std::{ops::RangeInclusive, sync::Arc};

use super::chunk_cache::ChunkCache;
use super::hex::{row_address, rows_for_len, HexRow};
use super::ViewerError;
use crate::config::limits::PREFETCH_MARGIN_ROWS;
use crate::source::RangeSource;

pub struct StreamingRenderer {
    cache: Arc<ChunkCache>,
    margin: u64,
}

impl StreamingRenderer {
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self {
            cache,
            margin: PREFETCH_MARGIN_ROWS,
        }
    }

    pub fn with_margin(mut self, rows: u64) -> Self {
        self.margin = rows;
        self
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Show another file. Everything cached for the previous one is dropped.
    pub fn set_file(&self, source: Arc<dyn RangeSource>) {
        self.cache.set_source(Some(source));
    }

    pub fn row_count(&self) -> u64 {
        rows_for_len(self.cache.file_len())
    }

    /// Visible window widened by the prefetch margin, clamped to the file.
    pub fn prefetch_window(&self, first: u64, last: u64) -> Option<RangeInclusive<u64>> {
        let rows = self.row_count();
        if rows == 0 {
            return None;
        }
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        let start = first.saturating_sub(self.margin).min(rows - 1);
        let end = last.saturating_add(self.margin).min(rows - 1);
        Some(start..=end)
    }

    /// Called whenever the visible rows change. Returns chunks fetched.
    pub async fn on_visible_range(&self, first: u64, last: u64) -> Result<usize, ViewerError> {
        match self.prefetch_window(first, last) {
            Some(window) => self.cache.ensure_range(*window.start(), *window.end()).await,
            None => Ok(0),
        }
    }

    pub fn render_row(&self, row: u64) -> HexRow {
        let address = row_address(row);
        match self.cache.row_bytes(row) {
            Some(bytes) => HexRow::Loaded { address, bytes },
            None => HexRow::Placeholder { address },
        }
    }

    pub fn render_rows(&self, rows: RangeInclusive<u64>) -> Vec<HexRow> {
        rows.map(|row| self.render_row(row)).collect()
    }
}
