//! Row geometry and hex/ASCII formatting for the streaming viewer.

use std::fmt;

use bytes::Bytes;

use crate::config::limits::{BYTES_PER_ROW, CHUNK_SIZE};

const PLACEHOLDER: &str = "loading...";

/// Chunk holding `row`. Rows never straddle chunks since 16 divides 65536.
pub fn chunk_index_for_row(row: u64) -> u64 {
    row.saturating_mul(BYTES_PER_ROW) / CHUNK_SIZE
}

/// Byte offset of `row` inside its chunk.
pub fn offset_in_chunk(row: u64) -> usize {
    (row.saturating_mul(BYTES_PER_ROW) % CHUNK_SIZE) as usize
}

/// Byte offset of the first byte of `row` in the file.
pub fn row_address(row: u64) -> u64 {
    row.saturating_mul(BYTES_PER_ROW)
}

/// Rows needed to show `len` bytes.
pub fn rows_for_len(len: u64) -> u64 {
    len.div_ceil(BYTES_PER_ROW)
}

/// 8 upper-case hex digits, zero padded.
pub fn format_address(offset: u64) -> String {
    format!("{offset:08X}")
}

fn byte_to_hex_digits(byte: u8) -> [char; 2] {
    const TABLE: &[u8; 16] = b"0123456789ABCDEF";
    [TABLE[(byte >> 4) as usize] as char, TABLE[(byte & 0x0F) as usize] as char]
}

/// 16 cells separated by single spaces; a missing byte is two spaces.
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(BYTES_PER_ROW as usize * 3);
    for i in 0..BYTES_PER_ROW as usize {
        if i > 0 {
            out.push(' ');
        }
        match bytes.get(i) {
            Some(&b) => out.extend(byte_to_hex_digits(b)),
            None => out.push_str("  "),
        }
    }
    out
}

/// Printable ASCII (32..=126) as itself, anything else as `.`.
pub fn format_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(BYTES_PER_ROW as usize)
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexRow {
    Loaded { address: u64, bytes: Bytes },
    /// The chunk for this row has not arrived yet.
    Placeholder { address: u64 },
}

impl HexRow {
    pub fn address(&self) -> u64 {
        match self {
            Self::Loaded { address, .. } | Self::Placeholder { address } => *address,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

impl fmt::Display for HexRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded { address, bytes } => write!(
                f,
                "{}  {}  {}",
                format_address(*address),
                format_hex_bytes(bytes),
                format_ascii(bytes)
            ),
            Self::Placeholder { address } => {
                write!(f, "{}  {PLACEHOLDER}", format_address(*address))
            }
        }
    }
}
