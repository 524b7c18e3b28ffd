//! Mid segments
//!
//! A mid segment owns the 256 leaf slots of a 1,048,576-id range. It is
//! either consolidated (every non-trivial leaf packed into one buffer),
//! expanded (every non-trivial leaf a standalone raw allocation), or briefly
//! mixed after single-leaf writes.
//!
//! # Invariants
//!
//! - `standalone == 0` iff the segment is consolidated
//! - `standalone == segments` iff the segment is expanded
//! - `occupied == 0` iff no leaf holds a set bit

use super::codec::{self, Trivial};
use super::errors::{BitmapError, BitmapResult};
use super::leaf::{self, ClearOutcome, LeafSlot, LeafView, LeafWords};
use super::{LEAF_BITS, LEAF_WORDS, MID_LEAVES};

const OCCUPANCY_BYTES: usize = MID_LEAVES / 8;

/// The 256 leaf slots of one mid segment
#[derive(Debug, Clone)]
pub struct MidLevel {
    slots: Vec<LeafSlot>,
    /// Consolidated chunk streams; may hold dead bytes of materialized leaves
    packed: Vec<u8>,
    /// Bytes of `packed` still referenced by a slot
    packed_live: usize,
    occupied: u16,
    segments: u16,
    standalone: u16,
    changed: bool,
}

impl Default for MidLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl MidLevel {
    /// Creates an empty mid segment
    pub fn new() -> Self {
        Self {
            slots: vec![LeafSlot::Empty; MID_LEAVES],
            packed: Vec::new(),
            packed_live: 0,
            occupied: 0,
            segments: 0,
            standalone: 0,
            changed: false,
        }
    }

    /// Whether no leaf holds a set bit
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Leaves holding at least one set bit
    pub fn occupied_count(&self) -> usize {
        self.occupied as usize
    }

    /// Leaves that are neither empty nor full
    pub fn segment_count(&self) -> usize {
        self.segments as usize
    }

    /// Leaves held as standalone raw allocations
    pub fn standalone_count(&self) -> usize {
        self.standalone as usize
    }

    /// Whether every non-trivial leaf lives in the packed buffer
    pub fn is_consolidated(&self) -> bool {
        self.standalone == 0
    }

    /// Whether every non-trivial leaf is a standalone allocation
    pub fn is_expanded(&self) -> bool {
        self.standalone == self.segments
    }

    /// Size of the consolidated buffer, dead bytes included
    pub fn packed_bytes(&self) -> usize {
        self.packed.len()
    }

    /// Whether the segment changed since it was last persisted
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.changed = false;
    }

    /// View of one leaf slot
    pub fn leaf(&self, leaf: usize) -> LeafView<'_> {
        match &self.slots[leaf] {
            LeafSlot::Empty => LeafView::Empty,
            LeafSlot::Full => LeafView::Full,
            LeafSlot::Packed { offset, len } => {
                let start = *offset as usize;
                LeafView::Packed(&self.packed[start..start + *len as usize])
            }
            LeafSlot::Raw(words) => LeafView::Raw(words),
        }
    }

    /// Word `word` of leaf `leaf`, decoded on demand
    pub fn word(&self, leaf: usize, word: usize) -> u64 {
        match self.leaf(leaf) {
            LeafView::Empty => 0,
            LeafView::Full => u64::MAX,
            LeafView::Packed(stream) => codec::word_stored(stream, word),
            LeafView::Raw(words) => words[word],
        }
    }

    /// Whether a bit is set
    pub fn contains(&self, leaf: usize, word: usize, bit: u32) -> bool {
        self.word(leaf, word) & (1u64 << bit) != 0
    }

    /// Number of set bits in the segment
    pub fn population(&self) -> u64 {
        let mut total = 0u64;
        let mut scratch = [0u64; LEAF_WORDS];
        for j in 0..MID_LEAVES {
            total += match self.leaf(j) {
                LeafView::Empty => 0,
                LeafView::Full => LEAF_BITS as u64,
                LeafView::Packed(stream) => {
                    codec::expand_stored(stream, &mut scratch);
                    leaf::population(&scratch) as u64
                }
                LeafView::Raw(words) => leaf::population(words) as u64,
            };
        }
        total
    }

    /// Set a bit. Returns true if it was previously clear.
    pub fn set_bit(&mut self, leaf: usize, word: usize, bit: u32) -> bool {
        if self.contains(leaf, word, bit) {
            return false;
        }
        leaf::set_raw(self.materialize(leaf), word, bit);
        self.changed = true;
        true
    }

    /// Clear a bit. Drops the leaf slot when its last bit goes and reports
    /// `BecameEmpty` when the whole segment is empty afterwards.
    pub fn clear_bit(&mut self, leaf: usize, word: usize, bit: u32) -> ClearOutcome {
        if !self.contains(leaf, word, bit) {
            return ClearOutcome::Unchanged;
        }
        let outcome = leaf::clear_raw(self.materialize(leaf), word, bit);
        self.changed = true;

        if outcome == ClearOutcome::BecameEmpty {
            self.slots[leaf] = LeafSlot::Empty;
            self.occupied -= 1;
            self.segments -= 1;
            self.standalone -= 1;
            if self.occupied == 0 {
                self.packed = Vec::new();
                self.packed_live = 0;
                return ClearOutcome::BecameEmpty;
            }
        }
        ClearOutcome::Cleared
    }

    /// Turn a slot into a standalone raw allocation before writing to it.
    fn materialize(&mut self, leaf: usize) -> &mut LeafWords {
        let fresh = match &self.slots[leaf] {
            LeafSlot::Raw(_) => None,
            LeafSlot::Empty => {
                self.occupied += 1;
                self.segments += 1;
                Some(Box::new([0u64; LEAF_WORDS]))
            }
            LeafSlot::Full => {
                self.segments += 1;
                Some(Box::new([u64::MAX; LEAF_WORDS]))
            }
            LeafSlot::Packed { offset, len } => {
                let start = *offset as usize;
                let end = start + *len as usize;
                let mut words = Box::new([0u64; LEAF_WORDS]);
                codec::expand_stored(&self.packed[start..end], &mut words);
                self.packed_live -= end - start;
                Some(words)
            }
        };

        if let Some(words) = fresh {
            self.standalone += 1;
            self.slots[leaf] = LeafSlot::Raw(words);
        }
        match &mut self.slots[leaf] {
            LeafSlot::Raw(words) => words.as_mut(),
            _ => unreachable!("leaf {} was materialized above", leaf),
        }
    }

    /// Compress every standalone leaf into one freshly sized buffer.
    ///
    /// Returns false when the segment was already consolidated.
    pub fn ensure_compressed(&mut self) -> bool {
        if self.standalone == 0 && self.packed_live == self.packed.len() {
            return false;
        }
        self.repack();
        true
    }

    /// Give every packed leaf its own raw allocation.
    ///
    /// Returns false when the segment was already expanded.
    pub fn ensure_decompressed(&mut self) -> bool {
        if self.standalone == self.segments {
            if !self.packed.is_empty() {
                self.packed = Vec::new();
                self.packed_live = 0;
            }
            return false;
        }

        let old = std::mem::take(&mut self.packed);
        for slot in self.slots.iter_mut() {
            if let LeafSlot::Packed { offset, len } = *slot {
                let start = offset as usize;
                let mut words = Box::new([0u64; LEAF_WORDS]);
                codec::expand_stored(&old[start..start + len as usize], &mut words);
                *slot = LeafSlot::Raw(words);
            }
        }
        self.standalone = self.segments;
        self.packed_live = 0;
        true
    }

    fn repack(&mut self) {
        let old = std::mem::take(&mut self.packed);
        let mut packed = Vec::with_capacity(self.packed_live + self.standalone as usize * 64);

        for slot in self.slots.iter_mut() {
            match slot {
                LeafSlot::Empty | LeafSlot::Full => {}
                LeafSlot::Raw(words) => {
                    let stream = codec::compress(words);
                    *slot = place(&mut packed, &stream);
                }
                LeafSlot::Packed { offset, len } => {
                    let start = *offset as usize;
                    let end = start + *len as usize;
                    *slot = place(&mut packed, &old[start..end]);
                }
            }
        }

        packed.shrink_to_fit();
        self.occupied = self.slots.iter().filter(|s| s.is_occupied()).count() as u16;
        self.segments = self.slots.iter().filter(|s| s.is_segment()).count() as u16;
        self.standalone = 0;
        self.packed_live = packed.len();
        self.packed = packed;
    }

    /// Byte length of `to_bytes()`
    pub fn persistent_length(&self) -> usize {
        let leaves: usize = (0..MID_LEAVES)
            .map(|j| match self.leaf(j) {
                LeafView::Empty => 0,
                LeafView::Full => 1,
                LeafView::Packed(stream) => stream.len(),
                LeafView::Raw(words) => codec::compress(words).len(),
            })
            .sum();
        OCCUPANCY_BYTES + leaves
    }

    /// Serialize as a 32-byte occupancy bitmap followed by one chunk stream
    /// per occupied leaf, ascending.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; OCCUPANCY_BYTES];
        for j in 0..MID_LEAVES {
            match self.leaf(j) {
                LeafView::Empty => continue,
                LeafView::Full => out.push(codec::ALL_ONES),
                LeafView::Packed(stream) => out.extend_from_slice(stream),
                LeafView::Raw(words) => out.extend_from_slice(&codec::compress(words)),
            }
            out[j / 8] |= 1 << (j % 8);
        }
        out
    }

    /// Restore a segment written by `to_bytes`. The result is consolidated.
    pub fn from_bytes(bytes: &[u8]) -> BitmapResult<Self> {
        if bytes.len() < OCCUPANCY_BYTES {
            return Err(BitmapError::length_mismatch(bytes.len(), "missing occupancy bitmap"));
        }
        let (occupancy, mut rest) = bytes.split_at(OCCUPANCY_BYTES);

        let mut mid = MidLevel::new();
        for j in 0..MID_LEAVES {
            if occupancy[j / 8] & (1 << (j % 8)) == 0 {
                continue;
            }
            let len = codec::stream_len(rest)?;
            // An occupied slot must hold at least one set bit
            if let Some(Trivial::Zero) = codec::trivial_kind(&rest[..len]) {
                return Err(BitmapError::invalid_bit_population(bytes.len() - rest.len(), 0));
            }
            let offset = mid.packed.len() as u32;
            mid.packed.extend_from_slice(&rest[..len]);
            mid.slots[j] = LeafSlot::Packed {
                offset,
                len: len as u32,
            };
            rest = &rest[len..];
        }
        if !rest.is_empty() {
            return Err(BitmapError::length_mismatch(
                bytes.len() - rest.len(),
                "trailing bytes after last leaf",
            ));
        }

        mid.packed_live = mid.packed.len();
        mid.repack();
        Ok(mid)
    }
}

/// Copy a stream into the consolidated buffer, or collapse it to a sentinel.
fn place(packed: &mut Vec<u8>, stream: &[u8]) -> LeafSlot {
    match codec::trivial_kind(stream) {
        Some(Trivial::Zero) => LeafSlot::Empty,
        Some(Trivial::Ones) => LeafSlot::Full,
        None => {
            let offset = packed.len() as u32;
            packed.extend_from_slice(stream);
            LeafSlot::Packed {
                offset,
                len: stream.len() as u32,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BitmapErrorCode;

    fn populated() -> MidLevel {
        let mut mid = MidLevel::new();
        mid.set_bit(0, 0, 0);
        mid.set_bit(0, 63, 63);
        mid.set_bit(7, 12, 5);
        mid.set_bit(255, 1, 1);
        mid
    }

    fn fill_leaf(mid: &mut MidLevel, leaf: usize) {
        for w in 0..LEAF_WORDS {
            for b in 0..64 {
                mid.set_bit(leaf, w, b);
            }
        }
    }

    #[test]
    fn test_set_allocates_lazily() {
        let mut mid = MidLevel::new();
        assert!(mid.is_empty());
        assert!(mid.set_bit(3, 4, 5));
        assert!(!mid.set_bit(3, 4, 5));
        assert_eq!(mid.occupied_count(), 1);
        assert_eq!(mid.segment_count(), 1);
        assert_eq!(mid.standalone_count(), 1);
        assert!(mid.contains(3, 4, 5));
        assert!(!mid.contains(3, 4, 6));
        assert!(mid.is_changed());
    }

    #[test]
    fn test_clear_last_bit_drops_leaf_and_segment() {
        let mut mid = MidLevel::new();
        mid.set_bit(1, 0, 0);
        mid.set_bit(2, 0, 0);

        assert_eq!(mid.clear_bit(1, 0, 1), ClearOutcome::Unchanged);
        assert_eq!(mid.clear_bit(1, 0, 0), ClearOutcome::Cleared);
        assert_eq!(mid.occupied_count(), 1);
        assert!(matches!(mid.leaf(1), LeafView::Empty));

        assert_eq!(mid.clear_bit(2, 0, 0), ClearOutcome::BecameEmpty);
        assert!(mid.is_empty());
        assert_eq!(mid.segment_count(), 0);
    }

    #[test]
    fn test_consolidate_and_expand() {
        let mut mid = populated();
        assert!(mid.is_expanded());

        assert!(mid.ensure_compressed());
        assert!(mid.is_consolidated());
        assert_eq!(mid.standalone_count(), 0);
        assert!(mid.contains(7, 12, 5));
        assert!(matches!(mid.leaf(7), LeafView::Packed(_)));

        assert!(mid.ensure_decompressed());
        assert!(mid.is_expanded());
        assert_eq!(mid.packed_bytes(), 0);
        assert!(mid.contains(255, 1, 1));
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let mut mid = populated();
        assert!(mid.ensure_compressed());
        let bytes = mid.to_bytes();
        assert!(!mid.ensure_compressed());
        assert_eq!(mid.to_bytes(), bytes);

        assert!(mid.ensure_decompressed());
        assert!(!mid.ensure_decompressed());
        assert_eq!(mid.to_bytes(), bytes);
    }

    #[test]
    fn test_write_to_packed_leaf_creates_mixed_state() {
        let mut mid = populated();
        mid.ensure_compressed();
        let packed = mid.packed_bytes();

        assert!(mid.set_bit(7, 12, 6));
        assert_eq!(mid.standalone_count(), 1);
        assert!(!mid.is_consolidated());
        assert!(!mid.is_expanded());
        assert_eq!(mid.packed_bytes(), packed);

        assert!(mid.ensure_compressed());
        assert!(mid.is_consolidated());
        assert!(mid.contains(7, 12, 5));
        assert!(mid.contains(7, 12, 6));
    }

    #[test]
    fn test_full_leaf_collapses_to_sentinel() {
        let mut mid = MidLevel::new();
        fill_leaf(&mut mid, 9);
        assert_eq!(mid.segment_count(), 1);

        mid.ensure_compressed();
        assert!(matches!(mid.leaf(9), LeafView::Full));
        assert_eq!(mid.segment_count(), 0);
        assert_eq!(mid.occupied_count(), 1);
        assert_eq!(mid.population(), LEAF_BITS as u64);

        // Writing a set bit into a full leaf is a no-op
        assert!(!mid.set_bit(9, 0, 0));
        assert_eq!(mid.clear_bit(9, 0, 0), ClearOutcome::Cleared);
        assert_eq!(mid.standalone_count(), 1);
        assert_eq!(mid.population(), LEAF_BITS as u64 - 1);
    }

    #[test]
    fn test_clear_inside_packed_leaf() {
        let mut mid = populated();
        mid.ensure_compressed();
        assert_eq!(mid.clear_bit(0, 0, 0), ClearOutcome::Cleared);
        assert_eq!(mid.clear_bit(0, 63, 63), ClearOutcome::Cleared);
        assert!(matches!(mid.leaf(0), LeafView::Empty));
        assert_eq!(mid.occupied_count(), 2);
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut mid = populated();
        fill_leaf(&mut mid, 100);

        let bytes = mid.to_bytes();
        assert_eq!(bytes.len(), mid.persistent_length());

        let restored = MidLevel::from_bytes(&bytes).unwrap();
        assert!(restored.is_consolidated());
        assert!(!restored.is_changed());
        assert_eq!(restored.population(), mid.population());
        assert!(matches!(restored.leaf(100), LeafView::Full));
        for (leaf, word, bit) in [(0, 0, 0), (0, 63, 63), (7, 12, 5), (255, 1, 1)] {
            assert!(restored.contains(leaf, word, bit));
        }
    }

    #[test]
    fn test_restore_collapses_foreign_trivial_stream() {
        let mut bytes = vec![0u8; OCCUPANCY_BYTES];
        bytes[0] = 0b0000_0001;
        // one sized ones-run chunk covering the whole leaf
        bytes.extend_from_slice(&[1, 0x31, 64]);

        let restored = MidLevel::from_bytes(&bytes).unwrap();
        assert!(matches!(restored.leaf(0), LeafView::Full));
        assert_eq!(restored.segment_count(), 0);
    }

    #[test]
    fn test_restore_rejects_corruption() {
        let err = MidLevel::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::LengthMismatch);

        let mut bytes = vec![0u8; OCCUPANCY_BYTES];
        bytes[0] = 1;
        bytes.extend_from_slice(&[1, 0xF3]);
        let err = MidLevel::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::InvalidChunkType);

        let mut bytes = vec![0u8; OCCUPANCY_BYTES];
        bytes.push(codec::ALL_ONES);
        let err = MidLevel::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::LengthMismatch);
    }
}
