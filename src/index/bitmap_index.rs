//! Bitmap index of one field
//!
//! Maps every key to an `Entry` owning that key's bitmap. Entries are
//! created on the first insert and removed when their last id is cleared.
//!
//! Result trees share an entry's `TopLevel` through an `Arc`. Writers go
//! through `Arc::make_mut`, so a tree that outlives its read token keeps
//! seeing the bitmap as it was when the tree was built.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::algebra::ResultNode;
use crate::bitmap::persist::EntrySnapshot;
use crate::bitmap::{BitmapResult, ClearOutcome, TopLevel};

use super::key::IndexKey;

/// Owner of one key's bitmap
#[derive(Debug, Clone, Default)]
pub struct Entry {
    top: Arc<TopLevel>,
}

impl Entry {
    /// Shared read-only bitmap
    pub fn top(&self) -> &Arc<TopLevel> {
        &self.top
    }

    fn top_mut(&mut self) -> &mut TopLevel {
        Arc::make_mut(&mut self.top)
    }

    /// Number of ids carrying the key
    pub fn cardinality(&self) -> u64 {
        self.top.cardinality()
    }
}

/// What a single-bit change did to the structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeEffect {
    /// The bit actually flipped
    pub changed: bool,
    /// Mid segments dropped
    pub mids_dropped: usize,
    /// The entry itself was dropped
    pub entry_dropped: bool,
}

/// Per-key bitmaps of one field
#[derive(Debug, Clone, Default)]
pub struct BitmapIndex {
    entries: HashMap<IndexKey, Entry>,
    /// Keys whose entry was dropped since the last snapshot. A key that was
    /// re-created afterwards stays here: its old segments are gone and the
    /// new entry must replace the persisted one, not merge into it.
    dropped: BTreeSet<IndexKey>,
}

impl BitmapIndex {
    /// Creates an index with no key
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with at least one id
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has an id
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry of a key
    pub fn entry(&self, key: &IndexKey) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Keys in ascending order
    pub fn keys(&self) -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Whether `id` carries `key`
    pub fn contains(&self, key: &IndexKey, id: u64) -> bool {
        self.entries.get(key).is_some_and(|e| e.top.contains(id))
    }

    /// Result node for one key; `Empty` when the key has no entry
    pub fn node(&self, key: &IndexKey) -> ResultNode {
        match self.entries.get(key) {
            Some(entry) => ResultNode::bitmap(Arc::clone(&entry.top)),
            None => ResultNode::empty(),
        }
    }

    /// Add `id` to `key`
    pub fn insert(&mut self, key: IndexKey, id: u64) -> bool {
        self.entries.entry(key).or_default().top_mut().set_bit(id)
    }

    /// Remove `id` from `key`
    pub fn remove(&mut self, key: &IndexKey, id: u64) -> ChangeEffect {
        let Some(entry) = self.entries.get_mut(key) else {
            return ChangeEffect::default();
        };
        if !entry.top.contains(id) {
            return ChangeEffect::default();
        }

        let mids_before = entry.top.mid_count();
        let outcome = entry.top_mut().clear_bit(id);
        let mids_after = entry.top.mid_count();

        let entry_dropped = outcome == ClearOutcome::BecameEmpty;
        if entry_dropped {
            self.entries.remove(key);
            self.dropped.insert(*key);
        }
        ChangeEffect {
            changed: true,
            mids_dropped: mids_before - mids_after,
            entry_dropped,
        }
    }

    /// Remove `id` from every key. Returns the keys it was removed from.
    pub fn remove_id(&mut self, id: u64) -> Vec<(IndexKey, ChangeEffect)> {
        let holding: Vec<IndexKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.top.contains(id))
            .map(|(key, _)| *key)
            .collect();
        holding
            .into_iter()
            .map(|key| {
                let effect = self.remove(&key, id);
                (key, effect)
            })
            .collect()
    }

    /// Consolidate every entry. Returns the mid segments repacked.
    pub fn compress_all(&mut self) -> usize {
        self.entries
            .values_mut()
            .filter(|e| e.top.standalone_count() > 0)
            .map(|e| e.top_mut().ensure_compressed())
            .sum()
    }

    /// Expand every entry. Returns the mid segments expanded.
    pub fn expand_all(&mut self) -> usize {
        self.entries
            .values_mut()
            .map(|e| e.top_mut().ensure_decompressed())
            .sum()
    }

    /// Changed entries and dropped keys since the last snapshot, by key.
    /// A key in both lists was dropped and re-created; replay the drop first.
    pub fn capture_changed(&self) -> (Vec<(IndexKey, EntrySnapshot)>, Vec<IndexKey>) {
        let mut changed: Vec<(IndexKey, EntrySnapshot)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.top.is_changed())
            .map(|(key, entry)| (*key, EntrySnapshot::capture_changed(&entry.top)))
            .collect();
        changed.sort_by_key(|(key, _)| *key);
        (changed, self.dropped.iter().copied().collect())
    }

    /// Clear every changed marker
    pub fn mark_persisted(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.top.is_changed() {
                entry.top_mut().mark_persisted();
            }
        }
        self.dropped.clear();
    }

    /// Replay a captured entry onto `key`
    pub fn apply_entry(&mut self, key: IndexKey, snapshot: &EntrySnapshot) -> BitmapResult<()> {
        let entry = self.entries.entry(key).or_default();
        snapshot.apply(entry.top_mut())?;
        if entry.top.is_empty() {
            self.entries.remove(&key);
        }
        self.dropped.remove(&key);
        Ok(())
    }

    /// Remove a key restored as dropped
    pub fn apply_dropped(&mut self, key: &IndexKey) {
        self.entries.remove(key);
        self.dropped.remove(key);
    }

    /// Structural counters
    pub fn stats(&self) -> FieldStats {
        let mut stats = FieldStats {
            keys: self.entries.len() as u64,
            ..FieldStats::default()
        };
        for entry in self.entries.values() {
            stats.set_bits += entry.top.cardinality();
            stats.mid_segments += entry.top.mid_count() as u64;
            stats.occupied_leaves += entry.top.occupied_count();
            stats.segment_leaves += entry.top.segment_count();
            stats.standalone_leaves += entry.top.standalone_count();
            stats.packed_bytes += entry.top.packed_bytes();
        }
        stats
    }
}

/// Structural counters of one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldStats {
    pub keys: u64,
    pub set_bits: u64,
    pub mid_segments: u64,
    pub occupied_leaves: u64,
    pub segment_leaves: u64,
    pub standalone_leaves: u64,
    pub packed_bytes: u64,
}
