//! Read view over an index manager
//!
//! A view holds a read token from the moment it is opened. Result trees
//! built from it share the entries' bitmaps; iterators opened from it hold
//! token clones of their own, so they keep writers out even after the view
//! is released.

use std::sync::Arc;

use crate::algebra::ResultNode;
use crate::bitmap::{BitmapError, BitmapResult};
use crate::iterate::{EntityIds, IdRange, ParallelIds, Resolved};

use super::coordinator::ReadToken;
use super::key::IndexKey;
use super::manager::IndexManager;
use super::resolver::EntityResolver;

/// Query entry point of an `IndexManager`
#[derive(Debug)]
pub struct ReadView<'a> {
    manager: &'a IndexManager,
    token: ReadToken,
    high_water: u64,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(manager: &'a IndexManager, token: ReadToken) -> Self {
        let high_water = manager.state().read().high_water;
        Self {
            manager,
            token,
            high_water,
        }
    }

    /// Max inserted id + 1 when the view was opened
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Range iterated by `ids`: every id up to the high-water mark
    pub fn default_range(&self) -> IdRange {
        IdRange::up_to(self.high_water)
    }

    /// Ids carrying `key` in `field`. A key without entry yields `Empty`.
    pub fn key(&self, field: &str, key: IndexKey) -> BitmapResult<ResultNode> {
        let state = self.manager.state().read();
        let index = state
            .indexes
            .get(field)
            .ok_or_else(|| BitmapError::usage(format!("no index defined for field '{}'", field)))?;
        Ok(index.node(&key))
    }

    /// Ids carrying any of `keys` in `field`
    pub fn any_of(&self, field: &str, keys: impl IntoIterator<Item = IndexKey>) -> BitmapResult<ResultNode> {
        let nodes = keys
            .into_iter()
            .map(|key| self.key(field, key))
            .collect::<BitmapResult<Vec<_>>>()?;
        Ok(ResultNode::or(nodes))
    }

    /// Ids matching `node` up to the high-water mark, ascending
    pub fn ids(&self, node: &ResultNode) -> EntityIds {
        EntityIds::registered(
            node,
            self.default_range(),
            self.token.clone(),
            Arc::clone(self.manager.metrics()),
        )
    }

    fn check_range(&self, range: IdRange) -> BitmapResult<()> {
        let ceiling = self.manager.config().id_ceiling;
        if range.bound() > ceiling {
            return Err(BitmapError::id_out_of_range(range.bound(), ceiling));
        }
        Ok(())
    }

    /// Ids matching `node` inside `range`
    pub fn ids_in(&self, node: &ResultNode, range: IdRange) -> BitmapResult<EntityIds> {
        self.check_range(range)?;
        Ok(EntityIds::registered(
            node,
            range,
            self.token.clone(),
            Arc::clone(self.manager.metrics()),
        ))
    }

    /// Entities matching `node`. Ids the resolver does not know are skipped.
    pub fn resolve<R: EntityResolver>(&self, node: &ResultNode, resolver: R) -> Resolved<EntityIds, R> {
        self.ids(node).resolve(resolver)
    }

    /// `ids`, evaluated on the manager's worker pool
    pub fn par_ids(&self, node: &ResultNode) -> ParallelIds {
        ParallelIds::registered(
            node,
            self.default_range(),
            self.manager.pool(),
            self.manager.max_backoff(),
            self.token.clone(),
            Arc::clone(self.manager.metrics()),
        )
    }

    /// `ids_in`, evaluated on the manager's worker pool
    pub fn par_ids_in(&self, node: &ResultNode, range: IdRange) -> BitmapResult<ParallelIds> {
        self.check_range(range)?;
        Ok(ParallelIds::registered(
            node,
            range,
            self.manager.pool(),
            self.manager.max_backoff(),
            self.token.clone(),
            Arc::clone(self.manager.metrics()),
        ))
    }

    /// Number of ids matching `node` up to the high-water mark
    pub fn count(&self, node: &ResultNode) -> u64 {
        self.ids(node).count_remaining()
    }

    /// Release the view's token. Iterators opened from it keep their own.
    pub fn release(mut self) {
        self.token.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BitmapErrorCode;
    use crate::index::IndexConfig;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn manager() -> IndexManager {
        let mut config = IndexConfig::with_id_ceiling(1 << 24);
        config.worker_threads = 2;
        let manager = IndexManager::new(config).unwrap();
        manager.define_index("color");
        manager.define_index("size");
        manager
    }

    #[test]
    fn test_queries() {
        let manager = manager();
        let red = IndexKey::from_int(1);
        let blue = IndexKey::from_int(2);
        let large = IndexKey::from_int(10);
        manager.insert_all("color", red, [1, 2, 3]).unwrap();
        manager.insert_all("color", blue, [4, 5]).unwrap();
        manager.insert_all("size", large, [2, 4, 6]).unwrap();

        let view = manager.read();
        let reds = view.key("color", red).unwrap();
        let larges = view.key("size", large).unwrap();
        assert_eq!(view.ids(&(reds.clone() & larges.clone())).collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            view.ids(&view.any_of("color", [red, blue]).unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        // NOT stops at the high-water mark
        assert_eq!(view.ids(&!reds).collect::<Vec<_>>(), vec![0, 4, 5, 6]);
        assert_eq!(view.count(&larges), 3);
    }

    #[test]
    fn test_unknown_field() {
        let manager = manager();
        let view = manager.read();
        let err = view.key("weight", IndexKey::from_int(1)).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::UsageViolation);
    }

    #[test]
    fn test_range_beyond_ceiling() {
        let manager = manager();
        let view = manager.read();
        let node = view.key("color", IndexKey::from_int(1)).unwrap();
        let err = view.ids_in(&node, IdRange::up_to(1 << 25)).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::IdOutOfRange);
        assert!(view.par_ids_in(&node, IdRange::up_to(1 << 25)).is_err());
    }

    #[test]
    fn test_resolve_skips_absent() {
        let manager = manager();
        let red = IndexKey::from_int(1);
        manager.insert_all("color", red, [1, 3]).unwrap();

        let entities: BTreeMap<u64, &str> = [(0, "zero"), (2, "two")].into_iter().collect();
        let view = manager.read();
        let not_red = !view.key("color", red).unwrap();
        let mut resolved = view.resolve(&not_red, &entities);
        let found: Vec<(u64, &str)> = resolved.by_ref().collect();
        assert_eq!(found, vec![(0, "zero"), (2, "two")]);
        assert_eq!(resolved.skipped(), 0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let manager = manager();
        let red = IndexKey::from_int(1);
        manager
            .insert_all("color", red, (0..3_000_000).step_by(1013))
            .unwrap();

        let view = manager.read();
        let node = view.key("color", red).unwrap();
        let expected: Vec<u64> = view.ids(&node).collect();
        let got: Vec<u64> = view.par_ids(&node).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_writer_waits_for_iterator() {
        let manager = manager();
        let red = IndexKey::from_int(1);
        manager.insert("color", red, 1).unwrap();

        let view = manager.read();
        let node = view.key("color", red).unwrap();
        let mut ids = view.ids(&node);
        view.release();

        assert!(manager.coordinator().try_write().is_none());
        ids.close();
        assert!(manager.coordinator().write_timeout(Duration::from_secs(5)).is_some());
    }
}
