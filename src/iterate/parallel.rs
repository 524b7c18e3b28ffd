//! Parallel iteration
//!
//! Workers on a rayon pool claim mid segments from a `ClaimRegistry`,
//! evaluate them eagerly with their own walker clone and publish the
//! resulting words. The consumer drains slots in ascending order, so ids
//! come out in the same order as the single-threaded iterator. When the
//! consumer reaches a slot nobody claimed yet it evaluates it itself, so
//! progress never depends on the pool having free threads.

use std::iter::FusedIterator;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::ThreadPool;

use crate::algebra::ResultNode;
use crate::index::{EntityResolver, ReadToken};
use crate::observability::{log_event_with_fields, BitmapMetrics, Event};

use super::iter::Resolved;
use super::range::IdRange;
use super::registry::{ClaimRegistry, SlotState};
use super::walker::{HierarchyWalker, SegmentWord};

const SPIN_STEPS: u32 = 6;
const YIELD_STEPS: u32 = 10;

/// Exponential poll backoff: spin, then yield, then sleep up to a cap
#[derive(Debug)]
struct Backoff {
    step: u32,
    max: Duration,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        Self { step: 0, max }
    }

    fn snooze(&mut self) {
        if self.step < SPIN_STEPS {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step < YIELD_STEPS {
            thread::yield_now();
        } else {
            let shift = (self.step - YIELD_STEPS).min(20);
            thread::sleep(Duration::from_micros(1u64 << shift).min(self.max));
        }
        self.step = self.step.saturating_add(1);
    }
}

#[derive(Debug)]
struct Shared {
    registry: ClaimRegistry,
    template: HierarchyWalker,
    range: IdRange,
    metrics: Option<Arc<BitmapMetrics>>,
}

impl Shared {
    fn evaluate(&self, walker: &mut HierarchyWalker, index: usize) -> Vec<SegmentWord> {
        let top = self.registry.top_of(index);
        walker.restart(self.range.intersect(&IdRange::of_mid(top)));
        let words: Vec<SegmentWord> = std::iter::from_fn(|| walker.next_word()).collect();
        if let Some(metrics) = &self.metrics {
            metrics.increment_parallel_segments();
        }
        words
    }
}

fn run_worker(worker: usize, shared: Arc<Shared>, token: Option<ReadToken>) {
    let worker_id = worker.to_string();
    log_event_with_fields(Event::WorkerStarted, &[("worker", &worker_id)]);

    let mut walker = shared.template.clone();
    let mut evaluated = 0usize;
    while let Some(index) = shared.registry.claim_next() {
        let words = shared.evaluate(&mut walker, index);
        shared.registry.publish(index, words);
        evaluated += 1;
    }
    drop(token);

    log_event_with_fields(
        Event::WorkerFinished,
        &[("worker", &worker_id), ("segments", &evaluated.to_string())],
    );
}

/// Iterator over matching ids, evaluated by a worker pool.
///
/// Yields the same ids in the same order as `EntityIds`. Closing or dropping
/// it stops workers from claiming further segments.
#[derive(Debug)]
pub struct ParallelIds {
    shared: Arc<Shared>,
    /// Walker for slots the consumer evaluates itself
    local: HierarchyWalker,
    next_slot: usize,
    words: Box<[SegmentWord]>,
    pos: usize,
    pending: u64,
    base: u64,
    max_backoff: Duration,
    token: Option<ReadToken>,
    closed: bool,
}

impl ParallelIds {
    /// Parallel iterator over a detached tree
    pub fn new(node: &ResultNode, range: IdRange, pool: &ThreadPool, max_backoff: Duration) -> Self {
        Self::spawn(node, range, pool, max_backoff, None, None)
    }

    pub(crate) fn registered(
        node: &ResultNode,
        range: IdRange,
        pool: &ThreadPool,
        max_backoff: Duration,
        token: ReadToken,
        metrics: Arc<BitmapMetrics>,
    ) -> Self {
        metrics.increment_iterators_opened();
        log_event_with_fields(
            Event::IteratorOpened,
            &[("bound", &range.bound().to_string()), ("parallel", "true")],
        );
        Self::spawn(node, range, pool, max_backoff, Some(token), Some(metrics))
    }

    fn spawn(
        node: &ResultNode,
        range: IdRange,
        pool: &ThreadPool,
        max_backoff: Duration,
        token: Option<ReadToken>,
        metrics: Option<Arc<BitmapMetrics>>,
    ) -> Self {
        let template = HierarchyWalker::new(node, range);
        let (first_top, slots) = match range.top_span() {
            Some((first, last)) => (first, last - first + 1),
            None => (0, 0),
        };
        let shared = Arc::new(Shared {
            registry: ClaimRegistry::new(first_top, slots),
            template: template.clone(),
            range,
            metrics,
        });

        let workers = pool.current_num_threads().min(slots);
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            let token = token.clone();
            pool.spawn(move || run_worker(worker, shared, token));
        }

        Self {
            shared,
            local: template,
            next_slot: 0,
            words: Box::default(),
            pos: 0,
            pending: 0,
            base: 0,
            max_backoff,
            token,
            closed: false,
        }
    }

    /// Stop iterating, cancel outstanding work and release the read token.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.registry.cancel();
        self.words = Box::default();
        self.pending = 0;
        if let Some(mut token) = self.token.take() {
            token.release();
            if let Some(metrics) = &self.shared.metrics {
                metrics.increment_iterators_closed();
            }
            log_event_with_fields(Event::IteratorClosed, &[("parallel", "true")]);
        }
    }

    /// Whether the iterator was closed or exhausted
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Map ids to entities, silently skipping ids the resolver does not know
    pub fn resolve<R: EntityResolver>(self, resolver: R) -> Resolved<Self, R> {
        Resolved::new(self, resolver)
    }

    /// Count the remaining ids word by word, then close
    pub fn count_remaining(mut self) -> u64 {
        let mut total = self.pending.count_ones() as u64;
        self.pending = 0;
        loop {
            total += self.words[self.pos..].iter().map(|w| w.count() as u64).sum::<u64>();
            self.pos = self.words.len();
            if !self.load_next_slot() {
                break;
            }
        }
        self.close();
        total
    }

    fn load_next_slot(&mut self) -> bool {
        if self.closed || self.next_slot >= self.shared.registry.len() {
            return false;
        }
        let index = self.next_slot;
        self.next_slot += 1;
        self.words = self.wait_for(index);
        self.pos = 0;
        true
    }

    fn wait_for(&mut self, index: usize) -> Box<[SegmentWord]> {
        let shared = Arc::clone(&self.shared);
        if shared.registry.try_claim(index) {
            return shared.evaluate(&mut self.local, index).into_boxed_slice();
        }

        let mut backoff = Backoff::new(self.max_backoff);
        loop {
            match shared.registry.state(index) {
                SlotState::Ready => return shared.registry.take(index).unwrap_or_default(),
                SlotState::Empty => return Box::default(),
                SlotState::Claimed | SlotState::Unclaimed => backoff.snooze(),
            }
        }
    }
}

impl Iterator for ParallelIds {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.trailing_zeros();
                self.pending &= self.pending - 1;
                return Some(self.base + bit as u64);
            }
            if let Some(word) = self.words.get(self.pos) {
                self.pending = word.bits;
                self.base = word.base;
                self.pos += 1;
                continue;
            }
            if !self.load_next_slot() {
                self.close();
                return None;
            }
        }
    }
}

impl FusedIterator for ParallelIds {}

impl Drop for ParallelIds {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{TopLevel, MID_BITS};
    use crate::index::AccessCoordinator;
    use crate::iterate::EntityIds;

    fn pool(threads: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    fn bitmap_of(ids: impl IntoIterator<Item = u64>) -> ResultNode {
        let mut top = TopLevel::new();
        for id in ids {
            top.set_bit(id);
        }
        ResultNode::bitmap(Arc::new(top))
    }

    fn spread_ids() -> Vec<u64> {
        (0..40u64).map(|i| i * (MID_BITS as u64 / 3) + i).collect()
    }

    #[test]
    fn test_matches_sequential_order() {
        let node = bitmap_of(spread_ids());
        let range = IdRange::up_to(20 * MID_BITS as u64);
        let expected: Vec<u64> = EntityIds::new(&node, range).collect();

        let pool = pool(4);
        let got: Vec<u64> = ParallelIds::new(&node, range, &pool, Duration::from_micros(100)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_single_thread_pool_and_consumer_claims() {
        let a = bitmap_of(0..5000);
        let b = bitmap_of((0..5000).step_by(7));
        let node = a & !b;
        let range = IdRange::up_to(5000);
        let expected: Vec<u64> = EntityIds::new(&node, range).collect();

        let pool = pool(1);
        let got: Vec<u64> = ParallelIds::new(&node, range, &pool, Duration::from_micros(50)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_empty_range() {
        let node = bitmap_of([1]);
        let pool = pool(2);
        let mut ids = ParallelIds::new(&node, IdRange::up_to(0), &pool, Duration::from_micros(10));
        assert_eq!(ids.next(), None);
        assert!(ids.is_closed());
    }

    #[test]
    fn test_count_remaining() {
        let node = bitmap_of(spread_ids());
        let pool = pool(3);
        let ids = ParallelIds::new(&node, IdRange::up_to(1 << 30), &pool, Duration::from_micros(10));
        assert_eq!(ids.count_remaining(), 40);
    }

    #[test]
    fn test_tokens_released_after_close() {
        let coordinator = AccessCoordinator::new();
        let node = bitmap_of(spread_ids());
        let pool = pool(2);
        let metrics = Arc::new(BitmapMetrics::new());

        let mut ids = ParallelIds::registered(
            &node,
            IdRange::up_to(1 << 30),
            &pool,
            Duration::from_micros(10),
            coordinator.read(),
            Arc::clone(&metrics),
        );
        assert_eq!(ids.next(), Some(0));
        ids.close();

        // Workers drop their token clones once they stop claiming
        let guard = coordinator.write_timeout(Duration::from_secs(10));
        assert!(guard.is_some());
        assert_eq!(metrics.snapshot().open_iterators(), 0);
    }
}
