//! TrainingStore: redb-backed persistence of measurements and actions.
//!
//! Implements [`TrainingDataSink`] for the decision engine and offers the
//! read side (row listings, dense training matrices) plus retention purge.
//! Supports on-disk and in-memory backends (the latter for testing).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use regex::Regex;
use rlscale_core::{AppName, Metric, TrainingDataSink};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe training-data store backed by redb.
#[derive(Clone)]
pub struct TrainingStore {
    db: Arc<Database>,
    /// Metric names matching this are never stored.
    exclusion: Option<Regex>,
}

impl TrainingStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            exclusion: None,
        };
        store.ensure_tables()?;
        debug!(?path, "training store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            exclusion: None,
        };
        store.ensure_tables()?;
        debug!("in-memory training store opened");
        Ok(store)
    }

    /// Skip metrics whose name matches `pattern` when storing rows.
    pub fn with_exclusion_regex(mut self, pattern: &str) -> StoreResult<Self> {
        self.exclusion = Some(Regex::new(pattern).map_err(map_err!(Regex))?);
        Ok(self)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(MEASUREMENTS).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclusion.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Group app-scoped, non-excluded measurements by app.
    fn values_by_app(&self, measurements: &[Metric]) -> BTreeMap<AppName, BTreeMap<String, f64>> {
        let mut by_app: BTreeMap<AppName, BTreeMap<String, f64>> = BTreeMap::new();
        for m in measurements {
            let Some(app) = m.app() else { continue };
            if self.is_excluded(&m.name) {
                continue;
            }
            by_app
                .entry(app.to_string())
                .or_default()
                .insert(m.name.clone(), m.value);
        }
        by_app
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Store one row per app; returns the number of rows written.
    pub fn put_measurements(&self, time_ms: u64, measurements: &[Metric]) -> StoreResult<usize> {
        let records: Vec<MeasurementRecord> = self
            .values_by_app(measurements)
            .into_iter()
            .map(|(app, values)| MeasurementRecord {
                app,
                time_ms,
                values,
            })
            .collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MEASUREMENTS).map_err(map_err!(Table))?;
            for record in &records {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(record.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rows = records.len(), time_ms, "measurements stored");
        Ok(records.len())
    }

    /// Store one row per app in `actions`, with that app's measurements as
    /// state; returns the number of rows written.
    pub fn put_actions(
        &self,
        time_ms: u64,
        measurements: &[Metric],
        actions: &HashMap<AppName, i64>,
    ) -> StoreResult<usize> {
        let mut by_app = self.values_by_app(measurements);
        let mut records: Vec<ActionRecord> = actions
            .iter()
            .map(|(app, &action)| ActionRecord {
                app: app.clone(),
                time_ms,
                values: by_app.remove(app).unwrap_or_default(),
                action,
            })
            .collect();
        records.sort_by(|a, b| a.app.cmp(&b.app));

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            for record in &records {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(record.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rows = records.len(), time_ms, "actions stored");
        Ok(records.len())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Measurement rows for `app` at or after `since_ms`, oldest first.
    pub fn list_measurements(&self, app: &str, since_ms: u64) -> StoreResult<Vec<MeasurementRecord>> {
        self.scan(MEASUREMENTS, app, since_ms)
    }

    /// Action rows for `app` at or after `since_ms`, oldest first.
    pub fn list_actions(&self, app: &str, since_ms: u64) -> StoreResult<Vec<ActionRecord>> {
        self.scan(ACTIONS, app, since_ms)
    }

    fn scan<T: serde::de::DeserializeOwned>(
        &self,
        def: RowTable,
        app: &str,
        since_ms: u64,
    ) -> StoreResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match parse_row_key(key.value()) {
                Some((row_app, time)) if row_app == app && time >= since_ms => {
                    let row: T =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    results.push(row);
                }
                _ => {}
            }
        }
        Ok(results)
    }

    /// Dense (state, action) matrix for `app`: one row per stored scaling
    /// round since `since_ms`, values in `columns` order, unmeasured cells
    /// filled by `missing`.
    pub fn training_rows(
        &self,
        app: &str,
        since_ms: u64,
        columns: &[&str],
        missing: MissingValueStrategy,
    ) -> StoreResult<Vec<TrainingRow>> {
        let rows = self
            .list_actions(app, since_ms)?
            .into_iter()
            .map(|record| TrainingRow {
                time_ms: record.time_ms,
                values: columns
                    .iter()
                    .map(|c| record.values.get(*c).copied().unwrap_or_else(|| missing.fill()))
                    .collect(),
                action: record.action,
            })
            .collect();
        Ok(rows)
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Delete rows older than `cutoff_ms` from both tables. Returns the
    /// number of rows removed.
    pub fn purge_older_than(&self, cutoff_ms: u64) -> StoreResult<usize> {
        let removed = self.purge_table(MEASUREMENTS, cutoff_ms)? + self.purge_table(ACTIONS, cutoff_ms)?;
        debug!(removed, cutoff_ms, "training data purged");
        Ok(removed)
    }

    fn purge_table(&self, def: RowTable, cutoff_ms: u64) -> StoreResult<usize> {
        // Collect keys in a read transaction first.
        let mut keys: Vec<String> = Vec::new();
        {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(def).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if let Some((_, time)) = parse_row_key(key.value())
                    && time < cutoff_ms
                {
                    keys.push(key.value().to_string());
                }
            }
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(keys.len())
    }
}

impl TrainingDataSink for TrainingStore {
    fn commit_actions(
        &self,
        time_ms: u64,
        measurements: &[Metric],
        actions: &HashMap<AppName, i64>,
    ) -> anyhow::Result<()> {
        self.put_actions(time_ms, measurements, actions)?;
        Ok(())
    }

    fn commit_measurements(&self, time_ms: u64, measurements: &[Metric]) -> anyhow::Result<()> {
        self.put_measurements(time_ms, measurements)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Metric> {
        vec![
            Metric::new("latency", 120.0, "web"),
            Metric::new("cpu", 0.7, "web"),
            Metric::new("latency", 30.0, "api"),
            Metric::unscoped("latency", 999.0),
        ]
    }

    #[test]
    fn measurements_are_grouped_by_app() {
        let store = TrainingStore::open_in_memory().unwrap();
        assert_eq!(store.put_measurements(1_000, &sample()).unwrap(), 2);

        let web = store.list_measurements("web", 0).unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].values.get("latency"), Some(&120.0));
        assert_eq!(web[0].values.get("cpu"), Some(&0.7));
        assert!(store.list_measurements("db", 0).unwrap().is_empty());
    }

    #[test]
    fn exclusion_regex_drops_metrics() {
        let store = TrainingStore::open_in_memory()
            .unwrap()
            .with_exclusion_regex("^cpu")
            .unwrap();
        store.put_measurements(1_000, &sample()).unwrap();
        let web = store.list_measurements("web", 0).unwrap();
        assert!(!web[0].values.contains_key("cpu"));
    }

    #[test]
    fn invalid_exclusion_regex_is_rejected() {
        let store = TrainingStore::open_in_memory().unwrap();
        assert!(matches!(store.with_exclusion_regex("("), Err(StoreError::Regex(_))));
    }

    #[test]
    fn actions_carry_state_and_delta() {
        let store = TrainingStore::open_in_memory().unwrap();
        let actions = HashMap::from([("web".to_string(), 1), ("api".to_string(), 0)]);
        assert_eq!(store.put_actions(2_000, &sample(), &actions).unwrap(), 2);

        let web = store.list_actions("web", 0).unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].action, 1);
        assert_eq!(web[0].values.len(), 2);
    }

    #[test]
    fn training_rows_fill_missing_cells() {
        let store = TrainingStore::open_in_memory().unwrap();
        let actions = HashMap::from([("web".to_string(), -1)]);
        store.put_actions(1_000, &sample(), &actions).unwrap();
        store
            .put_actions(2_000, &[Metric::new("latency", 80.0, "web")], &actions)
            .unwrap();

        let rows = store
            .training_rows("web", 0, &["latency", "cpu"], MissingValueStrategy::default())
            .unwrap();
        assert_eq!(
            rows,
            vec![
                TrainingRow { time_ms: 1_000, values: vec![120.0, 0.7], action: -1 },
                TrainingRow { time_ms: 2_000, values: vec![80.0, -1.0], action: -1 },
            ]
        );

        let recent = store
            .training_rows("web", 1_500, &["latency"], MissingValueStrategy::Constant(0.0))
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn purge_removes_old_rows_from_both_tables() {
        let store = TrainingStore::open_in_memory().unwrap();
        let actions = HashMap::from([("web".to_string(), 0)]);
        for t in [1_000, 2_000, 3_000] {
            store.put_measurements(t, &sample()).unwrap();
            store.put_actions(t, &sample(), &actions).unwrap();
        }

        // 2 apps × 2 old measurement rows + 2 old action rows.
        assert_eq!(store.purge_older_than(3_000).unwrap(), 6);
        assert_eq!(store.list_measurements("web", 0).unwrap().len(), 1);
        assert_eq!(store.list_actions("web", 0).unwrap().len(), 1);
        assert_eq!(store.purge_older_than(0).unwrap(), 0);
    }

    #[test]
    fn purge_keeps_rows_at_cutoff_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("training.redb");
        let actions = HashMap::from([("web".to_string(), 1)]);

        {
            let store = TrainingStore::open(&db_path).unwrap();
            for t in [1_000, 2_000] {
                store.put_measurements(t, &sample()).unwrap();
                store.put_actions(t, &sample(), &actions).unwrap();
            }
            // Only the t=1000 rows are strictly older than the cutoff.
            assert_eq!(store.purge_older_than(2_000).unwrap(), 3);
        }

        let store = TrainingStore::open(&db_path).unwrap();
        let web = store.list_measurements("web", 0).unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].time_ms, 2_000);
        assert_eq!(store.list_actions("web", 0).unwrap().len(), 1);
        assert_eq!(store.purge_older_than(2_000).unwrap(), 0);
    }

    #[test]
    fn sink_contract_writes_through() {
        let store = TrainingStore::open_in_memory().unwrap();
        let sink: &dyn TrainingDataSink = &store;
        sink.commit_measurements(5_000, &sample()).unwrap();
        sink.commit_actions(5_000, &sample(), &HashMap::from([("api".to_string(), 0)]))
            .unwrap();
        assert_eq!(store.list_measurements("api", 0).unwrap().len(), 1);
        assert_eq!(store.list_actions("api", 0).unwrap().len(), 1);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("training.redb");

        {
            let store = TrainingStore::open(&db_path).unwrap();
            store.put_measurements(1_000, &sample()).unwrap();
        }

        let store = TrainingStore::open(&db_path).unwrap();
        assert_eq!(store.list_measurements("web", 0).unwrap().len(), 1);
    }
}
