//! Leaf slots
//!
//! A leaf covers 4096 consecutive entity ids. Its slot inside a mid segment
//! is one of four states; only `Raw` owns a standalone allocation, `Packed`
//! points into the mid segment's consolidated buffer.

use super::errors::{BitmapError, BitmapResult};
use super::{LEAF_BYTES, LEAF_WORDS};

/// The 64 membership words of one leaf
pub type LeafWords = [u64; LEAF_WORDS];

/// State of one leaf slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafSlot {
    /// No id of the leaf is set; nothing allocated
    Empty,
    /// Every id of the leaf is set; nothing allocated
    Full,
    /// Chunk stream stored in the owning mid segment's buffer
    Packed {
        /// Byte offset in the consolidated buffer
        offset: u32,
        /// Stream length in bytes
        len: u32,
    },
    /// Standalone decompressed words
    Raw(Box<LeafWords>),
}

impl LeafSlot {
    /// Whether the slot holds at least one set bit
    pub fn is_occupied(&self) -> bool {
        !matches!(self, LeafSlot::Empty)
    }

    /// Whether the slot carries data beyond a trivial sentinel
    pub fn is_segment(&self) -> bool {
        matches!(self, LeafSlot::Packed { .. } | LeafSlot::Raw(_))
    }
}

/// Read-only view of a leaf slot
#[derive(Debug, Clone, Copy)]
pub enum LeafView<'a> {
    /// No bit set
    Empty,
    /// All bits set
    Full,
    /// Compressed chunk stream
    Packed(&'a [u8]),
    /// Decompressed words
    Raw(&'a LeafWords),
}

/// Result of clearing a bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The bit was not set
    Unchanged,
    /// The bit was cleared and the structure still holds set bits
    Cleared,
    /// The bit was the last one; the structure is now empty
    BecameEmpty,
}

/// Set a bit in raw words. Returns true if the bit was previously clear.
pub fn set_raw(words: &mut LeafWords, word: usize, bit: u32) -> bool {
    let mask = 1u64 << bit;
    let was_clear = words[word] & mask == 0;
    words[word] |= mask;
    was_clear
}

/// Clear a bit in raw words.
pub fn clear_raw(words: &mut LeafWords, word: usize, bit: u32) -> ClearOutcome {
    let mask = 1u64 << bit;
    if words[word] & mask == 0 {
        return ClearOutcome::Unchanged;
    }
    words[word] &= !mask;
    if words[word] == 0 && words.iter().all(|&w| w == 0) {
        ClearOutcome::BecameEmpty
    } else {
        ClearOutcome::Cleared
    }
}

/// Number of set bits in raw words
pub fn population(words: &LeafWords) -> u32 {
    words.iter().map(|w| w.count_ones()).sum()
}

/// Encode raw words as 512 little-endian bytes
pub fn raw_to_bytes(words: &LeafWords) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEAF_BYTES);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

/// Decode raw words from 512 little-endian bytes
pub fn raw_from_bytes(bytes: &[u8]) -> BitmapResult<Box<LeafWords>> {
    if bytes.len() % 8 != 0 || bytes.len() != LEAF_BYTES {
        return Err(BitmapError::invalid_segment_length(bytes.len()));
    }
    let mut words = Box::new([0u64; LEAF_WORDS]);
    for (i, chunk) in bytes.chunks_exact(8).enumerate() {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        words[i] = u64::from_le_bytes(buf);
    }
    Ok(words)
}
