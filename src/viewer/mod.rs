//! Streaming hex viewer: chunk cache plus the renderer that drives it.

pub mod chunk_cache;
pub mod hex;
pub mod streaming;

pub use chunk_cache::ChunkCache;
pub use hex::HexRow;
pub use streaming::StreamingRenderer;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("Viewer.ReadFailed: {0}")]
    Io(#[from] std::io::Error),
}
