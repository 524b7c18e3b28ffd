//! Pull-based iterators over matching ids

use std::iter::FusedIterator;
use std::sync::Arc;

use crate::algebra::ResultNode;
use crate::index::{EntityResolver, ReadToken};
use crate::observability::{log_event_with_fields, BitmapMetrics, Event};

use super::range::IdRange;
use super::walker::HierarchyWalker;

/// Iterator over the ids matching a result tree, ascending.
///
/// While open it holds a read token, which keeps writers out. Exhaustion,
/// `close()` and drop all release the token.
#[derive(Debug)]
pub struct EntityIds {
    walker: HierarchyWalker,
    token: Option<ReadToken>,
    metrics: Option<Arc<BitmapMetrics>>,
}

impl EntityIds {
    /// Iterator over a detached tree, outside any index manager
    pub fn new(node: &ResultNode, range: IdRange) -> Self {
        Self {
            walker: HierarchyWalker::new(node, range),
            token: None,
            metrics: None,
        }
    }

    pub(crate) fn registered(
        node: &ResultNode,
        range: IdRange,
        token: ReadToken,
        metrics: Arc<BitmapMetrics>,
    ) -> Self {
        metrics.increment_iterators_opened();
        log_event_with_fields(
            Event::IteratorOpened,
            &[
                ("start", &range.start().to_string()),
                ("bound", &range.bound().to_string()),
            ],
        );
        Self {
            walker: HierarchyWalker::new(node, range),
            token: Some(token),
            metrics: Some(metrics),
        }
    }

    /// Range being iterated
    pub fn range(&self) -> IdRange {
        self.walker.range()
    }

    /// Stop iterating and release the read token. Idempotent.
    pub fn close(&mut self) {
        self.walker.close();
        if let Some(mut token) = self.token.take() {
            token.release();
            if let Some(metrics) = &self.metrics {
                metrics.increment_iterators_closed();
            }
            log_event_with_fields(Event::IteratorClosed, &[("bound", &self.range().bound().to_string())]);
        }
    }

    /// Whether the iterator was closed or exhausted
    pub fn is_closed(&self) -> bool {
        self.walker.is_exhausted()
    }

    /// Count the remaining ids word by word, then close
    pub fn count_remaining(mut self) -> u64 {
        let total = self.walker.count_remaining();
        self.close();
        total
    }

    /// Map ids to entities, silently skipping ids the resolver does not know
    pub fn resolve<R: EntityResolver>(self, resolver: R) -> Resolved<Self, R> {
        Resolved::new(self, resolver)
    }
}

impl Iterator for EntityIds {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let next = self.walker.next_id();
        if next.is_none() {
            self.close();
        }
        next
    }
}

impl FusedIterator for EntityIds {}

impl Drop for EntityIds {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ids paired with their resolved entities. Absent entities are skipped:
/// negated queries produce ids that were never assigned or were removed.
#[derive(Debug)]
pub struct Resolved<I, R> {
    ids: I,
    resolver: R,
    skipped: u64,
}

impl<I, R> Resolved<I, R>
where
    I: Iterator<Item = u64>,
    R: EntityResolver,
{
    /// Wrap an id iterator
    pub fn new(ids: I, resolver: R) -> Self {
        Self {
            ids,
            resolver,
            skipped: 0,
        }
    }

    /// Ids so far that resolved to nothing
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// The wrapped id iterator
    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.ids
    }
}

impl<I, R> Iterator for Resolved<I, R>
where
    I: Iterator<Item = u64>,
    R: EntityResolver,
{
    type Item = (u64, R::Entity);

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            match self.resolver.resolve(id) {
                Some(entity) => return Some((id, entity)),
                None => self.skipped += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::TopLevel;
    use crate::index::AccessCoordinator;
    use std::collections::BTreeMap;

    fn bitmap_of(ids: impl IntoIterator<Item = u64>) -> ResultNode {
        let mut top = TopLevel::new();
        for id in ids {
            top.set_bit(id);
        }
        ResultNode::bitmap(Arc::new(top))
    }

    #[test]
    fn test_detached_iteration() {
        let node = bitmap_of([9, 3, 4000]);
        let ids: Vec<u64> = EntityIds::new(&node, IdRange::up_to(1 << 20)).collect();
        assert_eq!(ids, vec![3, 9, 4000]);
    }

    #[test]
    fn test_token_released_on_exhaustion() {
        let coordinator = AccessCoordinator::new();
        let metrics = Arc::new(BitmapMetrics::new());
        let node = bitmap_of([1, 2]);

        let mut ids = EntityIds::registered(&node, IdRange::up_to(64), coordinator.read(), Arc::clone(&metrics));
        assert_eq!(coordinator.active_readers(), 1);
        assert_eq!(ids.next(), Some(1));
        assert_eq!(ids.next(), Some(2));
        assert_eq!(coordinator.active_readers(), 1);
        assert_eq!(ids.next(), None);
        assert_eq!(coordinator.active_readers(), 0);
        assert!(ids.is_closed());

        drop(ids);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.iterators_opened, 1);
        assert_eq!(snapshot.iterators_closed, 1);
    }

    #[test]
    fn test_close_early_releases_token() {
        let coordinator = AccessCoordinator::new();
        let node = bitmap_of(0..100);
        let metrics = Arc::new(BitmapMetrics::new());

        let mut ids = EntityIds::registered(&node, IdRange::up_to(100), coordinator.read(), metrics);
        assert_eq!(ids.next(), Some(0));
        ids.close();
        ids.close();
        assert_eq!(coordinator.active_readers(), 0);
        assert_eq!(ids.next(), None);

        let ids = EntityIds::registered(
            &node,
            IdRange::up_to(100),
            coordinator.read(),
            Arc::new(BitmapMetrics::new()),
        );
        drop(ids);
        assert_eq!(coordinator.active_readers(), 0);
    }

    #[test]
    fn test_resolved_skips_absent_entities() {
        let node = !bitmap_of(0..3);
        let mut store = BTreeMap::new();
        store.insert(3u64, "d");
        store.insert(5u64, "f");

        let mut resolved = EntityIds::new(&node, IdRange::up_to(8)).resolve(&store);
        let items: Vec<(u64, &str)> = resolved.by_ref().collect();
        assert_eq!(items, vec![(3, "d"), (5, "f")]);
        assert_eq!(resolved.skipped(), 3);
    }

    #[test]
    fn test_count_remaining() {
        let node = bitmap_of(0..5000);
        let ids = EntityIds::new(&node, IdRange::new(10, 4010).unwrap());
        assert_eq!(ids.count_remaining(), 4000);
    }
}
