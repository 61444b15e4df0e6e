use ahash::AHashMap as HashMap;
use log::debug;

use crate::errors::{AnomalyError, Result};
use crate::isolation::IsolationLevel;
use crate::record::{NewRecord, Record, RecordId};
use crate::storage::StorageTransaction;

/// Record gateway bound to one open transaction.
///
/// The repository keeps an identity map of every record it handed out during
/// the transaction. A lookup by identity is answered from that map when the
/// record is present, without reaching the store. This mirrors what an
/// object-relational session does, and it is the reason the non-repeatable
/// read choreography must evict its baseline record before reading again.
pub struct RecordRepository<'t> {
    txn: &'t mut dyn StorageTransaction,
    cache: HashMap<RecordId, Record>,
}

impl<'t> RecordRepository<'t> {
    pub fn new(txn: &'t mut dyn StorageTransaction) -> Self {
        Self {
            txn,
            cache: HashMap::new(),
        }
    }

    pub fn level(&self) -> IsolationLevel {
        self.txn.level()
    }

    /// Persists a new record and returns it with its identity.
    pub fn create(&mut self, record: NewRecord) -> Result<Record> {
        let created = self.txn.insert(&record)?;
        self.cache.insert(created.id(), created.clone());
        Ok(created)
    }

    /// Persists several new records, in order.
    pub fn create_all(&mut self, records: impl IntoIterator<Item = NewRecord>) -> Result<Vec<Record>> {
        records
            .into_iter()
            .map(|record| self.create(record))
            .collect()
    }

    /// Finds a record by identity.
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::NotFound` if no such row is visible. A missing
    /// record is never defaulted.
    pub fn find_by_id(&mut self, id: RecordId) -> Result<Record> {
        if let Some(cached) = self.cache.get(&id) {
            debug!("Record {} served from session cache", id);
            return Ok(cached.clone());
        }
        let record = self
            .txn
            .select_by_id(id)?
            .ok_or(AnomalyError::NotFound(id))?;
        self.cache.insert(id, record.clone());
        Ok(record)
    }

    /// Scans all records. Always hits the store; rows that are already in the
    /// session cache are returned in their cached form.
    pub fn find_all(&mut self) -> Result<Vec<Record>> {
        let rows = self.txn.select_all()?;
        Ok(self.attach_all(rows))
    }

    pub fn find_all_above_rating(&mut self, threshold: i32) -> Result<Vec<Record>> {
        let rows = self.txn.select_rating_above(threshold)?;
        Ok(self.attach_all(rows))
    }

    /// Writes the record back to the store and refreshes the session cache.
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::NotFound` if the row no longer exists.
    pub fn save(&mut self, record: &Record) -> Result<Record> {
        if !self.txn.update(record)? {
            return Err(AnomalyError::NotFound(record.id()));
        }
        self.cache.insert(record.id(), record.clone());
        Ok(record.clone())
    }

    pub fn delete_all(&mut self) -> Result<u64> {
        self.cache.clear();
        self.txn.delete_all()
    }

    /// Evicts one record from the session cache so the next lookup reaches
    /// the store. Returns whether the record was cached.
    pub fn detach(&mut self, id: RecordId) -> bool {
        self.cache.remove(&id).is_some()
    }

    /// Evicts every record from the session cache.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, id: RecordId) -> bool {
        self.cache.contains_key(&id)
    }

    fn attach_all(&mut self, rows: Vec<Record>) -> Vec<Record> {
        rows.into_iter()
            .map(|row| {
                self.cache
                    .entry(row.id())
                    .or_insert(row)
                    .clone()
            })
            .collect()
    }
}
