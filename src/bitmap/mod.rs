//! Hierarchical bitmap subsystem
//!
//! One bitmap tracks which entity ids carry a given index key. It is split
//! into three levels:
//!
//! - `TopLevel`: sparse, growable array of mid segments covering the id space
//! - `MidLevel`: 256 leaf slots (1,048,576 ids), consolidated or expanded
//! - leaf slot: 64 words of 64 bits (4096 ids), empty, full, packed or raw
//!
//! An entity id decomposes as
//! `top_index << 20 | leaf_index << 12 | word_index << 6 | bit`.
//!
//! # Invariants
//!
//! - A leaf slot that holds no set bit is always `Empty`, never an allocation
//! - A mid segment with no occupied leaf is removed from its top level
//! - Packed leaf streams are validated before they are stored

pub mod codec;
mod errors;
mod leaf;
mod mid;
pub mod persist;
mod top;

pub use errors::{BitmapError, BitmapErrorCode, BitmapResult, Severity};
pub use leaf::{raw_from_bytes, raw_to_bytes, ClearOutcome, LeafSlot, LeafView, LeafWords};
pub use mid::MidLevel;
pub use top::TopLevel;

/// Bits per word
pub const WORD_BITS: usize = 64;
/// Words per leaf segment
pub const LEAF_WORDS: usize = 64;
/// Entity ids covered by one leaf segment
pub const LEAF_BITS: usize = WORD_BITS * LEAF_WORDS;
/// Byte length of an uncompressed leaf
pub const LEAF_BYTES: usize = LEAF_WORDS * 8;
/// Leaf slots per mid segment
pub const MID_LEAVES: usize = 256;
/// Entity ids covered by one mid segment
pub const MID_BITS: usize = LEAF_BITS * MID_LEAVES;

pub(crate) const WORD_SHIFT: u32 = 6;
pub(crate) const LEAF_SHIFT: u32 = 12;
pub(crate) const MID_SHIFT: u32 = 20;

/// Position of an entity id inside the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitAddress {
    /// Mid segment slot in the top level
    pub top: usize,
    /// Leaf slot in the mid segment
    pub leaf: usize,
    /// Word in the leaf
    pub word: usize,
    /// Bit in the word
    pub bit: u32,
}

impl BitAddress {
    /// Decompose an entity id
    pub fn of(id: u64) -> Self {
        Self {
            top: (id >> MID_SHIFT) as usize,
            leaf: ((id >> LEAF_SHIFT) as usize) & (MID_LEAVES - 1),
            word: ((id >> WORD_SHIFT) as usize) & (LEAF_WORDS - 1),
            bit: (id as u32) & (WORD_BITS as u32 - 1),
        }
    }

    /// Recompose the entity id
    pub fn id(&self) -> u64 {
        ((self.top as u64) << MID_SHIFT)
            | ((self.leaf as u64) << LEAF_SHIFT)
            | ((self.word as u64) << WORD_SHIFT)
            | self.bit as u64
    }
}

/// First entity id of a word position
pub fn word_base_id(top: usize, leaf: usize, word: usize) -> u64 {
    ((top as u64) << MID_SHIFT) | ((leaf as u64) << LEAF_SHIFT) | ((word as u64) << WORD_SHIFT)
}
