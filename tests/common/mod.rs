//! Common utilities for the harness integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use isolation_anomalies::prelude::*;
use parking_lot::Mutex;

// --- MockStorage ---

/// An in-memory stand-in for the external store.
///
/// It behaves like a multi-version store with snapshot-based repeatable read:
/// * read-uncommitted and read-committed see the latest committed rows at
///   every statement;
/// * repeatable-read and serializable see the rows committed when their first
///   statement ran;
/// * writes stay private to the transaction until commit;
/// * a snapshot transaction that commits a write to a row someone else
///   committed after its snapshot fails with a serialization failure.
#[derive(Debug, Default)]
pub struct MockStorage {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: Mutex<Committed>,
    next_id: AtomicI64,
    begun: AtomicUsize,
    rolled_back: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
    /// Commits at this level fail with a serialization failure.
    failing_commits: Mutex<Option<IsolationLevel>>,
}

#[derive(Debug, Default, Clone)]
struct Committed {
    rows: BTreeMap<RecordId, Record>,
    /// Commit version that last touched each identity, deletes included.
    modified: HashMap<RecordId, u64>,
    version: u64,
}

impl MockStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose reads each sleep for `delay` first.
    pub fn with_read_delay(delay: Duration) -> Self {
        let storage = Self::new();
        *storage.shared.read_delay.lock() = Some(delay);
        storage
    }

    /// Creates a store that rejects every commit at `level` with a
    /// serialization failure, the way a store aborts a transaction it cannot
    /// serialize.
    pub fn failing_commits_at(level: IsolationLevel) -> Self {
        let storage = Self::new();
        *storage.shared.failing_commits.lock() = Some(level);
        storage
    }

    /// The committed row with identity `id`, if any.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.shared.committed.lock().rows.get(&id).cloned()
    }

    /// Every committed row, ordered by identity.
    pub fn rows(&self) -> Vec<Record> {
        self.shared.committed.lock().rows.values().cloned().collect()
    }

    /// How many transactions were opened so far.
    pub fn transactions_begun(&self) -> usize {
        self.shared.begun.load(Ordering::SeqCst)
    }

    /// How many transactions were explicitly rolled back so far.
    pub fn rollbacks(&self) -> usize {
        self.shared.rolled_back.load(Ordering::SeqCst)
    }
}

impl Storage for MockStorage {
    fn begin(&self, level: IsolationLevel) -> Result<Box<dyn StorageTransaction>> {
        self.shared.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            shared: Arc::clone(&self.shared),
            level,
            snapshot: None,
            writes: BTreeMap::new(),
        }))
    }
}

struct MockTransaction {
    shared: Arc<Shared>,
    level: IsolationLevel,
    snapshot: Option<Committed>,
    /// Pending writes. `None` marks a delete.
    writes: BTreeMap<RecordId, Option<Record>>,
}

impl MockTransaction {
    fn uses_snapshot(&self) -> bool {
        self.level.effective() >= IsolationLevel::RepeatableRead
    }

    /// Rows visible to the next statement, own pending writes included.
    fn visible(&mut self) -> BTreeMap<RecordId, Record> {
        let mut rows = if self.uses_snapshot() {
            self.snapshot
                .get_or_insert_with(|| self.shared.committed.lock().clone())
                .rows
                .clone()
        } else {
            self.shared.committed.lock().rows.clone()
        };
        for (id, write) in &self.writes {
            match write {
                Some(record) => {
                    rows.insert(*id, record.clone());
                }
                None => {
                    rows.remove(id);
                }
            }
        }
        rows
    }

    fn read_delay(&self) {
        let delay = *self.shared.read_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
    }
}

impl StorageTransaction for MockTransaction {
    fn level(&self) -> IsolationLevel {
        self.level
    }

    fn insert(&mut self, record: &NewRecord) -> Result<Record> {
        // Take the snapshot before the first write, like any other statement.
        self.visible();
        let id = RecordId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = Record::with_identity(id, record.clone());
        self.writes.insert(id, Some(created.clone()));
        Ok(created)
    }

    fn select_by_id(&mut self, id: RecordId) -> Result<Option<Record>> {
        self.read_delay();
        Ok(self.visible().remove(&id))
    }

    fn select_all(&mut self) -> Result<Vec<Record>> {
        self.read_delay();
        Ok(self.visible().into_values().collect())
    }

    fn select_rating_above(&mut self, threshold: i32) -> Result<Vec<Record>> {
        self.read_delay();
        Ok(self
            .visible()
            .into_values()
            .filter(|record| record.rating > threshold)
            .collect())
    }

    fn update(&mut self, record: &Record) -> Result<bool> {
        if !self.visible().contains_key(&record.id()) {
            return Ok(false);
        }
        self.writes.insert(record.id(), Some(record.clone()));
        Ok(true)
    }

    fn delete_all(&mut self) -> Result<u64> {
        let ids: Vec<RecordId> = self.visible().into_keys().collect();
        for id in &ids {
            self.writes.insert(*id, None);
        }
        Ok(ids.len() as u64)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MockTransaction {
            shared,
            level,
            snapshot,
            writes,
        } = *self;
        if *shared.failing_commits.lock() == Some(level) {
            return Err(AnomalyError::SerializationFailure(format!(
                "could not serialize access at {}",
                level
            )));
        }
        let mut committed = shared.committed.lock();
        if let Some(snapshot) = &snapshot {
            for id in writes.keys() {
                let touched = committed.modified.get(id).copied().unwrap_or(0);
                if touched > snapshot.version {
                    return Err(AnomalyError::SerializationFailure(format!(
                        "could not serialize access due to concurrent update of {}",
                        id
                    )));
                }
            }
        }
        if writes.is_empty() {
            return Ok(());
        }
        committed.version += 1;
        let version = committed.version;
        for (id, write) in writes {
            match write {
                Some(record) => {
                    committed.rows.insert(id, record);
                }
                None => {
                    committed.rows.remove(&id);
                }
            }
            committed.modified.insert(id, version);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// --- Helper Functions ---

/// Timeouts short enough that a broken choreography fails a test quickly.
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        barrier: Duration::from_secs(5),
        actor: Duration::from_secs(10),
    }
}

/// Helper function to create a driver over a fresh [MockStorage].
pub fn setup_driver(timeouts: Timeouts) -> (Arc<MockStorage>, ScenarioDriver) {
    setup_driver_with(MockStorage::new(), timeouts)
}

pub fn setup_driver_with(
    storage: MockStorage,
    timeouts: Timeouts,
) -> (Arc<MockStorage>, ScenarioDriver) {
    let storage = Arc::new(storage);
    let runner = Arc::new(TransactionRunner::new(
        storage.clone(),
        IsolationLevel::ReadCommitted,
    ));
    (storage, ScenarioDriver::new(runner, timeouts))
}

/// Helper function to create a runner over a fresh [MockStorage].
pub fn setup_runner() -> (Arc<MockStorage>, TransactionRunner) {
    let storage = Arc::new(MockStorage::new());
    let runner = TransactionRunner::new(storage.clone(), IsolationLevel::ReadCommitted);
    (storage, runner)
}

/// Position of the first event of `actor` at `step`.
pub fn position(events: &[Event], actor: Actor, step: Step) -> usize {
    events
        .iter()
        .position(|event| event.actor == actor && event.step == step)
        .unwrap_or_else(|| panic!("{} never reached {:?} in {:?}", actor, step, events))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
