//! Fixed-window text chunker with overlap.
//!
//! Splits normalized item text into windows of [`CHUNK_SIZE`] characters,
//! advancing by [`stride`] so consecutive windows share [`overlap`]
//! characters. Windows are measured in Unicode scalar values, so a window
//! boundary never lands inside a UTF-8 sequence.
//!
//! Each window is trimmed; windows that trim to nothing are dropped. Every
//! kept piece carries a SHA-256 hex digest of its trimmed text.
//!
//! # Example
//!
//! ```rust
//! use teamkb_core::chunk::chunk_text;
//!
//! let text = "x".repeat(3000);
//! let pieces = chunk_text(&text);
//! assert_eq!(pieces.len(), 4);
//! assert_eq!(pieces[0].text.chars().count(), 1000);
//! ```

use sha2::{Digest, Sha256};

/// Window length in characters.
pub const CHUNK_SIZE: usize = 1000;

/// Share of each window repeated at the start of the next one.
pub const OVERLAP_PERCENT: usize = 12;

/// Characters shared between consecutive windows (120).
pub const fn overlap() -> usize {
    CHUNK_SIZE * OVERLAP_PERCENT / 100
}

/// Distance between window starts (880).
pub const fn stride() -> usize {
    CHUNK_SIZE - overlap()
}

/// A chunk of text with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub text: String,
    pub hash: String,
}

/// Split `text` into overlapping, trimmed, hashed pieces.
///
/// The input is trimmed first; an empty result yields no pieces. Output
/// order is window order and is fully deterministic.
pub fn chunk_text(text: &str) -> Vec<ChunkPiece> {
    windows(text.trim())
        .into_iter()
        .filter_map(|w| {
            let trimmed = w.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(ChunkPiece {
                    text: trimmed.to_string(),
                    hash: content_hash(trimmed),
                })
            }
        })
        .collect()
}

/// Raw, untrimmed windows over `text`.
pub(crate) fn windows(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char start, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_len = bounds.len();
    bounds.push(text.len());

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < char_len {
        let end = (start + CHUNK_SIZE).min(char_len);
        out.push(&text[bounds[start]..bounds[end]]);
        start += stride();
    }
    out
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
