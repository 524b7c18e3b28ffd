//! Index Manager for bitdex
//!
//! Owns the named bitmap indexes of one entity collection, the access
//! coordinator they share and the worker pool used by parallel iteration.
//!
//! # API
//!
//! - `define_index(field)` - Create an empty bitmap index
//! - `insert(field, key, id)` / `remove(field, key, id)` - Single bit changes
//! - `update(field, id, old, new)` - Move an id between keys
//! - `compress_all()` / `expand_all()` / `flush()` - Compression state
//! - `read()` - Open a `ReadView` for queries
//! - `snapshot_changed()` / `restore_snapshot(snapshot)` - Persistence
//!
//! # Locking
//!
//! Every mutating call takes the writer gate for its whole duration and
//! waits until no read token is alive. A thread must release its own
//! `ReadView` and iterators before mutating, otherwise it waits forever.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rayon::ThreadPool;
use serde::Serialize;

use crate::bitmap::{BitmapError, BitmapResult};
use crate::observability::{log_event_with_fields, BitmapMetrics, Event, MetricsSnapshot, ObservationScope};

use super::bitmap_index::{BitmapIndex, ChangeEffect, FieldStats};
use super::config::{ConfigError, ConfigResult, IndexConfig};
use super::coordinator::{AccessCoordinator, WriteGuard};
use super::errors::IndexResult;
use super::key::IndexKey;
use super::snapshot::{FieldSnapshot, IndexSnapshot, KeySnapshot};
use super::view::ReadView;

#[derive(Debug, Clone, Default)]
pub(crate) struct IndexState {
    pub(crate) indexes: BTreeMap<String, BitmapIndex>,
    /// Max inserted id + 1
    pub(crate) high_water: u64,
}

/// Structural counters of a manager
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub high_water: u64,
    pub fields: BTreeMap<String, FieldStats>,
    pub metrics: MetricsSnapshot,
}

/// Named bitmap indexes sharing one coordinator
#[derive(Debug)]
pub struct IndexManager {
    config: IndexConfig,
    coordinator: AccessCoordinator,
    state: RwLock<IndexState>,
    metrics: Arc<BitmapMetrics>,
    pool: Arc<ThreadPool>,
}

impl IndexManager {
    /// Validate the configuration and build the worker pool
    pub fn new(config: IndexConfig) -> ConfigResult<Self> {
        config.validate()?;
        let workers = config.effective_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("bitdex-worker-{}", i))
            .build()
            .map_err(|e| ConfigError::WorkerPool(e.to_string()))?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("id_ceiling", &config.id_ceiling.to_string()),
                ("workers", &workers.to_string()),
            ],
        );

        Ok(Self {
            config,
            coordinator: AccessCoordinator::new(),
            state: RwLock::new(IndexState::default()),
            metrics: Arc::new(BitmapMetrics::new()),
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &AccessCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<BitmapMetrics> {
        &self.metrics
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub(crate) fn max_backoff(&self) -> Duration {
        Duration::from_micros(self.config.max_backoff_micros)
    }

    pub(crate) fn state(&self) -> &RwLock<IndexState> {
        &self.state
    }

    fn write_gate(&self, operation: &str) -> WriteGuard<'_> {
        let guard = self.coordinator.write();
        if guard.waited() {
            self.metrics.increment_writer_waits();
            log_event_with_fields(Event::WriterBlocked, &[("operation", operation)]);
        }
        guard
    }

    /// Names of the defined indexes
    pub fn fields(&self) -> Vec<String> {
        self.state.read().indexes.keys().cloned().collect()
    }

    /// Max inserted id + 1
    pub fn high_water(&self) -> u64 {
        self.state.read().high_water
    }

    /// Create an empty index for `field`. Returns false if it already exists.
    pub fn define_index(&self, field: &str) -> bool {
        let _gate = self.write_gate("define_index");
        let mut state = self.state.write();
        if state.indexes.contains_key(field) {
            return false;
        }
        state.indexes.insert(field.to_string(), BitmapIndex::new());
        log_event_with_fields(Event::IndexDefined, &[("field", field)]);
        true
    }

    fn check_id(&self, id: u64) -> BitmapResult<()> {
        if id >= self.config.id_ceiling {
            return Err(BitmapError::id_out_of_range(id, self.config.id_ceiling));
        }
        Ok(())
    }

    fn index_mut<'s>(state: &'s mut IndexState, field: &str) -> BitmapResult<&'s mut BitmapIndex> {
        state
            .indexes
            .get_mut(field)
            .ok_or_else(|| BitmapError::usage(format!("no index defined for field '{}'", field)))
    }

    /// Add `id` to `key` of `field`. Returns whether the bit was newly set.
    pub fn insert(&self, field: &str, key: IndexKey, id: u64) -> BitmapResult<bool> {
        self.insert_all(field, key, [id]).map(|n| n == 1)
    }

    /// Add every id to `key` of `field`. Returns the number of bits newly set.
    pub fn insert_all(&self, field: &str, key: IndexKey, ids: impl IntoIterator<Item = u64>) -> BitmapResult<u64> {
        let ids: Vec<u64> = ids.into_iter().collect();
        for &id in &ids {
            self.check_id(id)?;
        }

        let _gate = self.write_gate("insert");
        let mut state = self.state.write();
        let index = Self::index_mut(&mut state, field)?;
        let set = ids.iter().filter(|&&id| index.insert(key, id)).count() as u64;

        if let Some(&max) = ids.iter().max() {
            state.high_water = state.high_water.max(max + 1);
        }
        self.metrics.add_bits_set(set);
        Ok(set)
    }

    fn record_clear(&self, field: &str, key: IndexKey, effect: ChangeEffect) {
        if !effect.changed {
            return;
        }
        self.metrics.increment_bits_cleared();
        if effect.mids_dropped > 0 {
            self.metrics.add_mids_dropped(effect.mids_dropped as u64);
            log_event_with_fields(Event::MidDropped, &[("field", field), ("key", &key.to_string())]);
        }
        if effect.entry_dropped {
            self.metrics.increment_entries_dropped();
            log_event_with_fields(Event::EntryDropped, &[("field", field), ("key", &key.to_string())]);
        }
    }

    /// Remove `id` from `key` of `field`. Returns whether the bit was set.
    pub fn remove(&self, field: &str, key: IndexKey, id: u64) -> BitmapResult<bool> {
        let _gate = self.write_gate("remove");
        let mut state = self.state.write();
        let effect = Self::index_mut(&mut state, field)?.remove(&key, id);
        self.record_clear(field, key, effect);
        Ok(effect.changed)
    }

    /// Move `id` from `old` to `new` within `field`
    pub fn update(&self, field: &str, id: u64, old: IndexKey, new: IndexKey) -> BitmapResult<()> {
        self.check_id(id)?;
        if old == new {
            return Ok(());
        }

        let _gate = self.write_gate("update");
        let mut state = self.state.write();
        let index = Self::index_mut(&mut state, field)?;
        let effect = index.remove(&old, id);
        let set = index.insert(new, id);
        state.high_water = state.high_water.max(id + 1);

        self.record_clear(field, old, effect);
        if set {
            self.metrics.increment_bits_set();
        }
        Ok(())
    }

    /// Remove `id` from every key of `field`. Returns the number of keys it
    /// was removed from.
    pub fn remove_entity(&self, field: &str, id: u64) -> BitmapResult<usize> {
        let _gate = self.write_gate("remove_entity");
        let mut state = self.state.write();
        let removed = Self::index_mut(&mut state, field)?.remove_id(id);
        for (key, effect) in &removed {
            self.record_clear(field, *key, *effect);
        }
        Ok(removed.len())
    }

    /// Consolidate every entry of every index
    pub fn compress_all(&self) -> usize {
        let scope = ObservationScope::new("INDEX_COMPRESS");
        let _gate = self.write_gate("compress_all");
        let mut state = self.state.write();

        let mut repacked = 0;
        for (field, index) in state.indexes.iter_mut() {
            let n = index.compress_all();
            if n > 0 {
                log_event_with_fields(
                    Event::EntryConsolidated,
                    &[("field", field), ("segments", &n.to_string())],
                );
            }
            repacked += n;
        }
        self.metrics.add_consolidations(repacked as u64);
        scope.complete_with_fields(&[("segments", &repacked.to_string())]);
        repacked
    }

    /// Expand every entry of every index
    pub fn expand_all(&self) -> usize {
        let scope = ObservationScope::new("INDEX_EXPAND");
        let _gate = self.write_gate("expand_all");
        let mut state = self.state.write();

        let mut expanded = 0;
        for (field, index) in state.indexes.iter_mut() {
            let n = index.expand_all();
            if n > 0 {
                log_event_with_fields(Event::EntryExpanded, &[("field", field), ("segments", &n.to_string())]);
            }
            expanded += n;
        }
        self.metrics.add_expansions(expanded as u64);
        scope.complete_with_fields(&[("segments", &expanded.to_string())]);
        expanded
    }

    /// End of a write batch. Consolidates when configured to.
    pub fn flush(&self) -> usize {
        if self.config.consolidate_on_flush {
            self.compress_all()
        } else {
            0
        }
    }

    /// Open a read view. Writers wait until it and every iterator opened
    /// from it are released.
    pub fn read(&self) -> ReadView<'_> {
        ReadView::new(self, self.coordinator.read())
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            high_water: state.high_water,
            fields: state
                .indexes
                .iter()
                .map(|(field, index)| (field.clone(), index.stats()))
                .collect(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn capture(state: &IndexState) -> IndexSnapshot {
        let fields = state
            .indexes
            .iter()
            .map(|(field, index)| {
                let (changed, dropped) = index.capture_changed();
                // Stable sort: a re-created key replays its drop before its entry
                let mut keys: Vec<KeySnapshot> = dropped
                    .into_iter()
                    .map(|key| KeySnapshot::Dropped { key })
                    .chain(changed.into_iter().map(|(key, entry)| KeySnapshot::Changed { key, entry }))
                    .collect();
                keys.sort_by_key(KeySnapshot::key);
                FieldSnapshot {
                    field: field.clone(),
                    keys,
                }
            })
            .collect();
        IndexSnapshot {
            high_water: state.high_water,
            fields,
        }
    }

    fn persisted(&self, state: &mut IndexState, snapshot: &IndexSnapshot) {
        for index in state.indexes.values_mut() {
            index.mark_persisted();
        }
        self.metrics.increment_snapshots_written();
        log_event_with_fields(
            Event::SnapshotWritten,
            &[
                ("keys", &snapshot.key_count().to_string()),
                ("high_water", &snapshot.high_water.to_string()),
            ],
        );
    }

    /// Capture every change since the previous snapshot and clear the
    /// changed markers
    pub fn snapshot_changed(&self) -> IndexSnapshot {
        let scope = ObservationScope::new("SNAPSHOT");
        let _gate = self.write_gate("snapshot");
        let mut state = self.state.write();
        let snapshot = Self::capture(&state);
        self.persisted(&mut state, &snapshot);
        scope.complete_with_fields(&[("keys", &snapshot.key_count().to_string())]);
        snapshot
    }

    /// Capture the changes and write them to `path`. Markers are cleared
    /// only once the file is written.
    pub fn write_snapshot(&self, path: &Path) -> IndexResult<IndexSnapshot> {
        let scope = ObservationScope::with_fields("SNAPSHOT", &[("path", &path.display().to_string())]);
        let _gate = self.write_gate("snapshot");
        let mut state = self.state.write();
        let snapshot = Self::capture(&state);
        if let Err(err) = snapshot.write_to(path) {
            scope.fail(&err.to_string());
            return Err(err);
        }
        self.persisted(&mut state, &snapshot);
        scope.complete_with_fields(&[("keys", &snapshot.key_count().to_string())]);
        Ok(snapshot)
    }

    /// Apply a snapshot on top of the current state. All or nothing: a
    /// corrupted record leaves every index untouched.
    pub fn restore_snapshot(&self, snapshot: &IndexSnapshot) -> IndexResult<()> {
        let scope = ObservationScope::new("RESTORE");
        let _gate = self.write_gate("restore");
        let mut state = self.state.write();

        let mut restored = state.clone();
        if let Err(err) = Self::apply(&mut restored, snapshot) {
            log_event_with_fields(
                Event::CorruptionDetected,
                &[("code", err.code().code()), ("reason", err.message())],
            );
            scope.fail_fatal(err.message());
            return Err(err.into());
        }
        *state = restored;

        self.metrics.increment_snapshots_restored();
        log_event_with_fields(Event::SnapshotRestored, &[("keys", &snapshot.key_count().to_string())]);
        scope.complete();
        Ok(())
    }

    /// Read a snapshot file and apply it
    pub fn restore_from(&self, path: &Path) -> IndexResult<()> {
        let snapshot = IndexSnapshot::read_from(path)?;
        self.restore_snapshot(&snapshot)
    }

    fn apply(state: &mut IndexState, snapshot: &IndexSnapshot) -> BitmapResult<()> {
        for field in &snapshot.fields {
            let index = state.indexes.entry(field.field.clone()).or_default();
            for key in &field.keys {
                match key {
                    KeySnapshot::Changed { key, entry } => index.apply_entry(*key, entry)?,
                    KeySnapshot::Dropped { key } => index.apply_dropped(key),
                }
            }
        }
        state.high_water = state.high_water.max(snapshot.high_water);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::persist::{checksum, EntrySnapshot};
    use crate::bitmap::{BitmapErrorCode, MID_BITS};
    use crate::index::IndexError;

    fn manager() -> IndexManager {
        let mut config = IndexConfig::with_id_ceiling(1 << 32);
        config.worker_threads = 2;
        IndexManager::new(config).unwrap()
    }

    fn red() -> IndexKey {
        IndexKey::from_int(1)
    }

    fn blue() -> IndexKey {
        IndexKey::from_int(2)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = IndexManager::new(IndexConfig::with_id_ceiling(100)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdCeiling(100)));
    }

    #[test]
    fn test_define_index_once() {
        let manager = manager();
        assert!(manager.define_index("color"));
        assert!(!manager.define_index("color"));
        assert_eq!(manager.fields(), vec!["color".to_string()]);
    }

    #[test]
    fn test_insert_requires_defined_field() {
        let manager = manager();
        let err = manager.insert("color", red(), 1).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::UsageViolation);
    }

    #[test]
    fn test_insert_beyond_ceiling() {
        let manager = manager();
        manager.define_index("color");
        let err = manager.insert("color", red(), 1 << 32).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::IdOutOfRange);
        assert_eq!(manager.high_water(), 0);
    }

    #[test]
    fn test_high_water_tracks_max_id() {
        let manager = manager();
        manager.define_index("color");
        manager.insert("color", red(), 10).unwrap();
        manager.insert("color", blue(), 3).unwrap();
        assert_eq!(manager.high_water(), 11);
    }

    #[test]
    fn test_update_moves_id() {
        let manager = manager();
        manager.define_index("color");
        manager.insert("color", red(), 7).unwrap();
        manager.update("color", 7, red(), blue()).unwrap();

        let view = manager.read();
        assert_eq!(view.ids(&view.key("color", red()).unwrap()).count(), 0);
        assert_eq!(view.ids(&view.key("color", blue()).unwrap()).collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_remove_entity_and_metrics() {
        let manager = manager();
        manager.define_index("color");
        manager.insert("color", red(), 7).unwrap();
        manager.insert("color", blue(), 7).unwrap();
        manager.insert("color", blue(), MID_BITS as u64 * 3).unwrap();

        assert_eq!(manager.remove_entity("color", 7).unwrap(), 2);
        let metrics = manager.metrics().snapshot();
        assert_eq!(metrics.bits_set, 3);
        assert_eq!(metrics.bits_cleared, 2);
        assert_eq!(metrics.entries_dropped, 1);
        assert_eq!(metrics.mids_dropped, 2);
    }

    #[test]
    fn test_flush_consolidates() {
        let manager = manager();
        manager.define_index("color");
        manager.insert_all("color", red(), 0..5000).unwrap();
        assert_eq!(manager.flush(), 1);
        assert_eq!(manager.stats().fields["color"].standalone_leaves, 0);
        // Leaf 0 is full and stays a sentinel
        assert_eq!(manager.expand_all(), 1);
        assert_eq!(manager.stats().fields["color"].standalone_leaves, 1);
    }

    #[test]
    fn test_snapshot_restore() {
        let source = manager();
        source.define_index("color");
        source.insert_all("color", red(), [1, 2, 3, 5_000_000]).unwrap();
        source.insert("color", blue(), 4).unwrap();
        let first = source.snapshot_changed();
        assert_eq!(first.key_count(), 2);
        assert!(source.snapshot_changed().is_empty());

        source.remove("color", blue(), 4).unwrap();
        let second = source.snapshot_changed();

        let target = manager();
        target.restore_snapshot(&first).unwrap();
        target.restore_snapshot(&second).unwrap();

        let view = target.read();
        let reds: Vec<u64> = view.ids(&view.key("color", red()).unwrap()).collect();
        assert_eq!(reds, vec![1, 2, 3, 5_000_000]);
        assert!(view.key("color", blue()).unwrap().is_empty_node());
        assert_eq!(view.high_water(), 5_000_001);
    }

    #[test]
    fn test_snapshot_of_recreated_key_replaces_old_segments() {
        let source = manager();
        source.define_index("color");
        let far = 5 * MID_BITS as u64;
        source.insert_all("color", red(), [1, far]).unwrap();
        let first = source.snapshot_changed();

        source.remove("color", red(), 1).unwrap();
        source.remove("color", red(), far).unwrap();
        source.insert("color", red(), 2).unwrap();
        let second = source.snapshot_changed();
        let keys = &second.fields[0].keys;
        assert!(matches!(keys[0], KeySnapshot::Dropped { .. }));
        assert!(matches!(keys[1], KeySnapshot::Changed { .. }));

        let target = manager();
        target.restore_snapshot(&first).unwrap();
        target.restore_snapshot(&second).unwrap();

        let view = target.read();
        let reds: Vec<u64> = view.ids(&view.key("color", red()).unwrap()).collect();
        assert_eq!(reds, vec![2]);
    }

    fn corrupt_entry() -> EntrySnapshot {
        // One mid whose only leaf claims five chunks and carries none
        let mut payload = vec![0u8; 32];
        payload[0] = 1;
        payload.push(0x05);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&checksum(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        EntrySnapshot::decode(&bytes).unwrap()
    }

    #[test]
    fn test_restore_is_all_or_nothing() {
        let source = manager();
        source.define_index("color");
        source.insert("color", red(), 1).unwrap();
        let mut snapshot = source.snapshot_changed();
        snapshot.fields[0].keys.push(KeySnapshot::Changed {
            key: blue(),
            entry: corrupt_entry(),
        });

        let target = manager();
        target.define_index("color");
        target.insert("color", blue(), 9).unwrap();

        let err = target.restore_snapshot(&snapshot).unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(err, IndexError::Bitmap(_)));

        let stats = target.stats();
        assert_eq!(stats.fields["color"].keys, 1);
        assert_eq!(stats.fields["color"].set_bits, 1);
        assert_eq!(stats.high_water, 10);
        assert_eq!(stats.metrics.snapshots_restored, 0);
    }

    #[test]
    fn test_restore_from_missing_file() {
        let target = manager();
        let err = target.restore_from(Path::new("/nonexistent/bitdex.bdxs")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_stats_serialize() {
        let manager = manager();
        manager.define_index("color");
        manager.insert("color", red(), 1).unwrap();
        let json = serde_json::to_string(&manager.stats()).unwrap();
        assert!(json.contains("\"high_water\":2"));
        assert!(json.contains("\"color\""));
    }
}
