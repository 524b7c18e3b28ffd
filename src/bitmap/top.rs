//! Top level of one key's bitmap
//!
//! A sparse, growable array of mid segment slots. Slots are allocated the
//! first time a bit in their range is set and dropped when their last bit is
//! cleared. Growth reallocates with 10% headroom.

use std::collections::BTreeSet;

use super::leaf::ClearOutcome;
use super::mid::MidLevel;
use super::BitAddress;

/// Sparse array of mid segments covering the id space of one key
#[derive(Debug, Clone, Default)]
pub struct TopLevel {
    mids: Vec<Option<Box<MidLevel>>>,
    mid_count: usize,
    /// Mid slots dropped since the last persisted snapshot
    dropped: BTreeSet<usize>,
}

impl TopLevel {
    /// Creates an empty top level
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no id is set
    pub fn is_empty(&self) -> bool {
        self.mid_count == 0
    }

    /// Allocated length of the slot array
    pub fn slot_len(&self) -> usize {
        self.mids.len()
    }

    /// Number of live mid segments
    pub fn mid_count(&self) -> usize {
        self.mid_count
    }

    /// Mid segment at a top index, if allocated
    pub fn mid(&self, top: usize) -> Option<&MidLevel> {
        self.mids.get(top).and_then(|slot| slot.as_deref())
    }

    /// Live mid segments in ascending top index order
    pub fn mids(&self) -> impl Iterator<Item = (usize, &MidLevel)> + '_ {
        self.mids
            .iter()
            .enumerate()
            .filter_map(|(top, slot)| slot.as_deref().map(|mid| (top, mid)))
    }

    /// Non-trivial leaves across all mid segments.
    ///
    /// This is the cost estimate used to order algebra operands.
    pub fn segment_count(&self) -> u64 {
        self.mids().map(|(_, mid)| mid.segment_count() as u64).sum()
    }

    /// Occupied leaves across all mid segments
    pub fn occupied_count(&self) -> u64 {
        self.mids().map(|(_, mid)| mid.occupied_count() as u64).sum()
    }

    /// Standalone raw leaves across all mid segments
    pub fn standalone_count(&self) -> u64 {
        self.mids().map(|(_, mid)| mid.standalone_count() as u64).sum()
    }

    /// Bytes held in consolidated buffers
    pub fn packed_bytes(&self) -> u64 {
        self.mids().map(|(_, mid)| mid.packed_bytes() as u64).sum()
    }

    /// Number of set ids
    pub fn cardinality(&self) -> u64 {
        self.mids().map(|(_, mid)| mid.population()).sum()
    }

    /// Whether an id is set
    pub fn contains(&self, id: u64) -> bool {
        let addr = BitAddress::of(id);
        match self.mid(addr.top) {
            Some(mid) => mid.contains(addr.leaf, addr.word, addr.bit),
            None => false,
        }
    }

    /// Set an id. Returns true if it was previously clear.
    pub fn set_bit(&mut self, id: u64) -> bool {
        let addr = BitAddress::of(id);
        self.ensure_slot(addr.top);

        let slot = &mut self.mids[addr.top];
        if slot.is_none() {
            *slot = Some(Box::new(MidLevel::new()));
            self.mid_count += 1;
            self.dropped.remove(&addr.top);
        }
        match slot {
            Some(mid) => mid.set_bit(addr.leaf, addr.word, addr.bit),
            None => unreachable!("mid slot {} allocated above", addr.top),
        }
    }

    /// Clear an id. `BecameEmpty` means the whole top level is now empty.
    pub fn clear_bit(&mut self, id: u64) -> ClearOutcome {
        let addr = BitAddress::of(id);
        let outcome = match self.mids.get_mut(addr.top) {
            Some(Some(mid)) => mid.clear_bit(addr.leaf, addr.word, addr.bit),
            _ => return ClearOutcome::Unchanged,
        };

        if outcome == ClearOutcome::BecameEmpty {
            self.remove_mid(addr.top);
            if self.mid_count > 0 {
                return ClearOutcome::Cleared;
            }
        }
        outcome
    }

    fn ensure_slot(&mut self, top: usize) {
        if top < self.mids.len() {
            return;
        }
        let needed = top + 1;
        let target = needed + needed / 10;
        let mut grown = Vec::with_capacity(target);
        grown.extend(self.mids.drain(..));
        grown.resize_with(target, || None);
        self.mids = grown;
    }

    /// Consolidate every mid segment. Returns how many were repacked.
    pub fn ensure_compressed(&mut self) -> usize {
        self.mids
            .iter_mut()
            .flatten()
            .map(|mid| mid.ensure_compressed())
            .filter(|&repacked| repacked)
            .count()
    }

    /// Expand every mid segment. Returns how many were expanded.
    pub fn ensure_decompressed(&mut self) -> usize {
        self.mids
            .iter_mut()
            .flatten()
            .map(|mid| mid.ensure_decompressed())
            .filter(|&expanded| expanded)
            .count()
    }

    /// Whether anything changed since the last persisted snapshot
    pub fn is_changed(&self) -> bool {
        !self.dropped.is_empty() || self.mids().any(|(_, mid)| mid.is_changed())
    }

    /// Mid segments changed since the last persisted snapshot
    pub fn changed_mids(&self) -> impl Iterator<Item = (usize, &MidLevel)> + '_ {
        self.mids().filter(|(_, mid)| mid.is_changed())
    }

    /// Top indexes of mid segments dropped since the last persisted snapshot
    pub fn dropped_mids(&self) -> impl Iterator<Item = usize> + '_ {
        self.dropped.iter().copied()
    }

    /// Clear every changed marker
    pub fn mark_persisted(&mut self) {
        for mid in self.mids.iter_mut().flatten() {
            mid.mark_persisted();
        }
        self.dropped.clear();
    }

    /// Install a restored mid segment, replacing whatever was there
    pub fn install_mid(&mut self, top: usize, mid: MidLevel) {
        if mid.is_empty() {
            self.remove_mid(top);
            return;
        }
        self.ensure_slot(top);
        if self.mids[top].is_none() {
            self.mid_count += 1;
        }
        self.mids[top] = Some(Box::new(mid));
        self.dropped.remove(&top);
    }

    /// Drop a mid segment slot
    pub fn remove_mid(&mut self, top: usize) -> bool {
        match self.mids.get_mut(top).and_then(Option::take) {
            Some(_) => {
                self.mid_count -= 1;
                self.dropped.insert(top);
                true
            }
            None => false,
        }
    }
}
