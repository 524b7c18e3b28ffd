//! Bitmap Hierarchy Tests
//!
//! Tests for the top/mid/leaf structure:
//! - Emptied leaves and mid segments are deallocated
//! - Consolidation and expansion are idempotent and preserve contents
//! - Full leaves collapse to the sentinel on every path
//! - Mid segment bytes round-trip and reject corruption

use bitdex::bitmap::{
    codec, BitmapErrorCode, ClearOutcome, LeafView, MidLevel, TopLevel, LEAF_BITS, MID_BITS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

// =============================================================================
// Helper Functions
// =============================================================================

fn top_of(ids: impl IntoIterator<Item = u64>) -> TopLevel {
    let mut top = TopLevel::new();
    for id in ids {
        top.set_bit(id);
    }
    top
}

fn ids_of(top: &TopLevel) -> Vec<u64> {
    let mut ids = Vec::new();
    for (t, mid) in top.mids() {
        for leaf in 0..256 {
            for word in 0..64 {
                let mut bits = mid.word(leaf, word);
                while bits != 0 {
                    let bit = bits.trailing_zeros() as u64;
                    bits &= bits - 1;
                    ids.push(((t as u64) << 20) | ((leaf as u64) << 12) | ((word as u64) << 6) | bit);
                }
            }
        }
    }
    ids
}

fn random_ids(seed: u64, n: usize, span: u64) -> BTreeSet<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..span)).collect()
}

// =============================================================================
// Deallocation Tests
// =============================================================================

/// Clearing the last bit of a leaf frees its slot; clearing the last bit of
/// the segment frees the segment.
#[test]
fn test_last_bit_of_leaf_deallocates_slot() {
    let mut top = top_of([1, LEAF_BITS as u64 + 5]);
    let mid = top.mid(0).unwrap();
    assert_eq!(mid.occupied_count(), 2);
    assert_eq!(top.segment_count(), 2);

    assert_eq!(top.clear_bit(LEAF_BITS as u64 + 5), ClearOutcome::Cleared);
    let mid = top.mid(0).unwrap();
    assert_eq!(mid.occupied_count(), 1);
    assert!(matches!(mid.leaf(1), LeafView::Empty));
    assert_eq!(top.segment_count(), 1);

    assert_eq!(top.clear_bit(1), ClearOutcome::BecameEmpty);
    assert!(top.mid(0).is_none());
    assert_eq!(top.mid_count(), 0);
    assert!(top.is_empty());
}

/// Mid-level clear reports the leaf emptying upward.
#[test]
fn test_mid_clear_outcomes() {
    let mut mid = MidLevel::new();
    assert!(mid.set_bit(3, 0, 0));
    assert!(mid.set_bit(4, 0, 0));
    assert_eq!(mid.clear_bit(3, 0, 1), ClearOutcome::Unchanged);
    assert_eq!(mid.clear_bit(3, 0, 0), ClearOutcome::Cleared);
    assert_eq!(mid.clear_bit(4, 0, 0), ClearOutcome::BecameEmpty);
    assert!(mid.is_empty());
}

/// Dropping a middle mid segment leaves its neighbours intact.
#[test]
fn test_mid_drop_keeps_neighbours() {
    let far = 5 * MID_BITS as u64 + 9;
    let mut top = top_of([0, MID_BITS as u64, far]);
    assert_eq!(top.mid_count(), 3);

    top.clear_bit(MID_BITS as u64);
    assert_eq!(top.mid_count(), 2);
    assert_eq!(ids_of(&top), vec![0, far]);
    assert!(top.dropped_mids().any(|t| t == 1));
}

// =============================================================================
// Consolidation Tests
// =============================================================================

/// Compressing or expanding twice matches doing it once.
#[test]
fn test_idempotent_consolidation() {
    let ids = random_ids(11, 20_000, 3 * MID_BITS as u64);
    let expected: Vec<u64> = ids.iter().copied().collect();
    let mut top = top_of(ids);

    assert!(top.ensure_compressed() > 0);
    assert_eq!(top.standalone_count(), 0);
    let packed_once = top.packed_bytes();
    assert_eq!(top.ensure_compressed(), 0);
    assert_eq!(top.packed_bytes(), packed_once);
    assert_eq!(ids_of(&top), expected);

    assert!(top.ensure_decompressed() > 0);
    assert_eq!(top.ensure_decompressed(), 0);
    assert_eq!(top.packed_bytes(), 0);
    assert_eq!(ids_of(&top), expected);
}

/// Writes into a consolidated segment materialize only the touched leaf.
#[test]
fn test_write_after_consolidation() {
    let mut top = top_of((0..10_000).step_by(3));
    top.ensure_compressed();

    assert!(top.set_bit(1));
    assert_eq!(top.standalone_count(), 1);
    assert!(top.contains(1));
    assert!(top.contains(3));
    assert_eq!(top.cardinality(), 3334 + 1);

    top.ensure_compressed();
    assert_eq!(top.standalone_count(), 0);
    assert!(top.contains(1));
}

// =============================================================================
// Full Leaf Tests
// =============================================================================

/// A leaf filled bit by bit becomes the full sentinel when consolidated,
/// and stays one through expansion.
#[test]
fn test_full_leaf_collapses_on_consolidation() {
    let mut top = top_of(0..LEAF_BITS as u64);
    assert!(matches!(top.mid(0).unwrap().leaf(0), LeafView::Raw(_)));

    top.ensure_compressed();
    assert!(matches!(top.mid(0).unwrap().leaf(0), LeafView::Full));
    assert_eq!(top.segment_count(), 0);
    assert_eq!(top.packed_bytes(), 0);

    top.ensure_decompressed();
    assert!(matches!(top.mid(0).unwrap().leaf(0), LeafView::Full));
    assert_eq!(top.cardinality(), LEAF_BITS as u64);
}

/// Clearing a bit of a full leaf expands it; refilling and consolidating
/// collapses it again.
#[test]
fn test_full_leaf_round_trip() {
    let mut top = top_of(0..LEAF_BITS as u64);
    top.ensure_compressed();

    assert_eq!(top.clear_bit(100), ClearOutcome::Cleared);
    assert!(matches!(top.mid(0).unwrap().leaf(0), LeafView::Raw(_)));
    assert!(!top.contains(100));

    top.set_bit(100);
    top.ensure_compressed();
    assert!(matches!(top.mid(0).unwrap().leaf(0), LeafView::Full));
}

// =============================================================================
// Persistence Tests
// =============================================================================

/// Segment bytes restore the same contents, consolidated.
#[test]
fn test_mid_bytes_round_trip() {
    let ids = random_ids(5, 3_000, MID_BITS as u64);
    let mut top = top_of(ids.iter().copied().chain(0..LEAF_BITS as u64));
    let mid = top.mid(0).unwrap();

    let bytes = mid.to_bytes();
    assert_eq!(bytes.len(), mid.persistent_length());
    let restored = MidLevel::from_bytes(&bytes).unwrap();
    assert!(restored.is_consolidated());
    assert!(!restored.is_changed());
    assert_eq!(restored.population(), mid.population());
    assert!(matches!(restored.leaf(0), LeafView::Full));

    top.ensure_compressed();
    assert_eq!(top.mid(0).unwrap().to_bytes(), bytes);
}

/// Truncated, overlong and corrupted segment bytes are rejected.
#[test]
fn test_mid_bytes_corruption() {
    let top = top_of([1, 2, 70_000]);
    let bytes = top.mid(0).unwrap().to_bytes();

    let err = MidLevel::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(err.code().is_corruption());

    let mut overlong = bytes.clone();
    overlong.push(0);
    let err = MidLevel::from_bytes(&overlong).unwrap_err();
    assert_eq!(err.code(), BitmapErrorCode::LengthMismatch);

    let mut bad_header = bytes.clone();
    bad_header[33] = 0xF0;
    let err = MidLevel::from_bytes(&bad_header).unwrap_err();
    assert_eq!(err.code(), BitmapErrorCode::InvalidChunkType);

    let err = MidLevel::from_bytes(&[0u8; 10]).unwrap_err();
    assert_eq!(err.code(), BitmapErrorCode::LengthMismatch);
}

/// A slot marked occupied whose stream encodes no set bits is rejected.
#[test]
fn test_mid_bytes_occupied_empty_leaf() {
    let mut bytes = vec![0u8; 32];
    bytes[0] = 0b1;
    bytes.push(codec::ALL_ZERO);
    let err = MidLevel::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.code(), BitmapErrorCode::InvalidBitPopulation);
    assert_eq!(err.offset(), Some(32));

    // Same contradiction behind a valid first leaf
    let top = top_of([1, 70_000]);
    let mut bytes = top.mid(0).unwrap().to_bytes();
    bytes[1] |= 0b1;
    bytes.push(codec::ALL_ZERO);
    let err = MidLevel::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.code(), BitmapErrorCode::InvalidBitPopulation);
    assert!(err.code().is_corruption());
}
