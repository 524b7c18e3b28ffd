//! Claim registry for parallel iteration
//!
//! One slot per mid segment of the iterated range. Slots are grouped by 64
//! and each group is allocated the first time one of its slots is touched.
//!
//! Slot states:
//!
//! ```text
//! UNCLAIMED --CAS--> CLAIMED --publish--> READY (words stored)
//!                            \-publish--> EMPTY (nothing matched)
//! ```
//!
//! Results are stored before the state is published with `Release`;
//! consumers read the state with `Acquire` before taking the words.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::walker::SegmentWord;

/// Slots per lazily allocated group
pub const GROUP_SLOTS: usize = 64;

const UNCLAIMED: u8 = 0;
const CLAIMED: u8 = 1;
const EMPTY: u8 = 2;
const READY: u8 = 3;

/// Observable state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nobody is evaluating the slot yet
    Unclaimed,
    /// A worker is evaluating the slot
    Claimed,
    /// Evaluated, nothing matched
    Empty,
    /// Evaluated, words are waiting to be taken
    Ready,
}

#[derive(Debug, Default)]
struct ClaimSlot {
    state: AtomicU8,
    words: Mutex<Option<Box<[SegmentWord]>>>,
}

/// Lock-free work distribution over mid segments
#[derive(Debug)]
pub struct ClaimRegistry {
    first_top: usize,
    len: usize,
    groups: Box<[OnceLock<Box<[ClaimSlot]>>]>,
    next_hint: AtomicUsize,
    cancelled: AtomicBool,
}

impl ClaimRegistry {
    /// Registry over mid segments `first_top..first_top + len`
    pub fn new(first_top: usize, len: usize) -> Self {
        let group_count = len.div_ceil(GROUP_SLOTS);
        Self {
            first_top,
            len,
            groups: (0..group_count).map(|_| OnceLock::new()).collect(),
            next_hint: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the registry has no slot
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mid segment covered by slot `index`
    pub fn top_of(&self, index: usize) -> usize {
        self.first_top + index
    }

    /// Groups allocated so far
    pub fn allocated_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.get().is_some()).count()
    }

    fn slot(&self, index: usize) -> &ClaimSlot {
        let group = self.groups[index / GROUP_SLOTS]
            .get_or_init(|| (0..GROUP_SLOTS).map(|_| ClaimSlot::default()).collect());
        &group[index % GROUP_SLOTS]
    }

    /// Claim a specific slot. Fails if someone else already did.
    pub fn try_claim(&self, index: usize) -> bool {
        self.slot(index)
            .state
            .compare_exchange(UNCLAIMED, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the lowest slot not yet offered to a worker
    pub fn claim_next(&self) -> Option<usize> {
        loop {
            if self.is_cancelled() {
                return None;
            }
            let index = self.next_hint.fetch_add(1, Ordering::Relaxed);
            if index >= self.len {
                return None;
            }
            if self.try_claim(index) {
                return Some(index);
            }
        }
    }

    /// Publish the result of a claimed slot
    pub fn publish(&self, index: usize, words: Vec<SegmentWord>) {
        let slot = self.slot(index);
        if words.is_empty() {
            slot.state.store(EMPTY, Ordering::Release);
            return;
        }
        *slot.words.lock() = Some(words.into_boxed_slice());
        slot.state.store(READY, Ordering::Release);
    }

    /// Current state of a slot
    pub fn state(&self, index: usize) -> SlotState {
        match self.slot(index).state.load(Ordering::Acquire) {
            UNCLAIMED => SlotState::Unclaimed,
            CLAIMED => SlotState::Claimed,
            EMPTY => SlotState::Empty,
            _ => SlotState::Ready,
        }
    }

    /// Take the published words of a ready slot. Each result is handed out
    /// once; later calls return `None`.
    pub fn take(&self, index: usize) -> Option<Box<[SegmentWord]>> {
        self.slot(index).words.lock().take()
    }

    /// Stop handing out work
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn word(base: u64) -> SegmentWord {
        SegmentWord { base, bits: 1 }
    }

    #[test]
    fn test_groups_allocated_lazily() {
        let registry = ClaimRegistry::new(10, 200);
        assert_eq!(registry.len(), 200);
        assert_eq!(registry.allocated_groups(), 0);

        assert!(registry.try_claim(130));
        assert_eq!(registry.allocated_groups(), 1);
        assert_eq!(registry.top_of(130), 140);
    }

    #[test]
    fn test_claim_once() {
        let registry = ClaimRegistry::new(0, 3);
        assert!(registry.try_claim(1));
        assert!(!registry.try_claim(1));
        assert_eq!(registry.state(1), SlotState::Claimed);

        assert_eq!(registry.claim_next(), Some(0));
        assert_eq!(registry.claim_next(), Some(2));
        assert_eq!(registry.claim_next(), None);
    }

    #[test]
    fn test_publish_and_take() {
        let registry = ClaimRegistry::new(0, 2);
        registry.try_claim(0);
        registry.try_claim(1);

        registry.publish(0, vec![word(0), word(64)]);
        registry.publish(1, Vec::new());
        assert_eq!(registry.state(0), SlotState::Ready);
        assert_eq!(registry.state(1), SlotState::Empty);

        assert_eq!(registry.take(0).map(|w| w.len()), Some(2));
        assert!(registry.take(0).is_none());
        assert!(registry.take(1).is_none());
    }

    #[test]
    fn test_cancel_stops_claims() {
        let registry = ClaimRegistry::new(0, 5);
        registry.cancel();
        assert!(registry.is_cancelled());
        assert_eq!(registry.claim_next(), None);
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let registry = Arc::new(ClaimRegistry::new(0, 1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(i) = registry.claim_next() {
                        claimed.push(i);
                    }
                    claimed
                })
            })
            .collect();

        let mut all: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
