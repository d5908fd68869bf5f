//! Sizes, ceilings and budgets

/// Streaming viewer geometry.
pub const CHUNK_SIZE: u64 = 64 * 1024; // 65536 bytes
pub const BYTES_PER_ROW: u64 = 16;
pub const ROWS_PER_CHUNK: u64 = CHUNK_SIZE / BYTES_PER_ROW; // 4096
/// Rows pre-fetched above and below the visible window.
pub const PREFETCH_MARGIN_ROWS: u64 = 60;

/// Cache ceilings.
pub const DEFAULT_MODULE_CACHE_MAX: usize = 16;
pub const DEFAULT_CHUNK_CACHE_MAX: usize = 256; // 16 MiB of chunks

/// Module runtime limits.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;
/// Upper bound on a module result string read back from linear memory.
pub const MAX_RESULT_BYTES: usize = 64 * 1024 * 1024;

/// Worker channel depths.
pub const JOB_QUEUE_DEPTH: usize = 16;
pub const EVENT_QUEUE_DEPTH: usize = 64;
