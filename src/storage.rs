use crate::errors::Result;
use crate::isolation::IsolationLevel;
use crate::record::{NewRecord, Record, RecordId};

/// Trait for the external store the harness runs its actors against.
///
/// The store owns every isolation and locking decision. The harness only asks
/// it for a transaction at a given [IsolationLevel] and then issues record
/// operations through the returned [StorageTransaction].
///
/// Each call to [Storage::begin] must hand out a transaction on its own
/// connection, so two actors holding transactions at the same time are
/// independent sessions from the store's point of view.
///
/// Implementations must be `Send` and `Sync` because both actors share one
/// storage handle from different threads.
pub trait Storage: Send + Sync {
    /// Opens a new transaction at `level`.
    ///
    /// # Arguments
    ///
    /// * `level` - The isolation level the store should run the transaction at.
    ///
    /// # Returns
    ///
    /// Returns the open transaction. Statements are issued through it until it
    /// is consumed by [StorageTransaction::commit] or
    /// [StorageTransaction::rollback].
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::Storage` if no connection could be obtained or
    /// the store rejected the `BEGIN`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use isolation_anomalies::prelude::*;
    ///
    /// fn count_rows(storage: &dyn Storage) -> Result<usize> {
    ///     let mut txn = storage.begin(IsolationLevel::RepeatableRead)?;
    ///     let rows = txn.select_all()?;
    ///     txn.commit()?;
    ///     Ok(rows.len())
    /// }
    /// ```
    fn begin(&self, level: IsolationLevel) -> Result<Box<dyn StorageTransaction>>;
}

/// One open transaction on the external store.
///
/// Every method is a single statement executed inside the transaction. No
/// method caches anything; caching is the repository's concern.
///
/// A transaction dropped without being committed or rolled back must be rolled
/// back by the implementation. This is what keeps a panicking actor from
/// leaving its transaction open.
pub trait StorageTransaction {
    /// The isolation level the transaction was opened at.
    fn level(&self) -> IsolationLevel;

    /// Inserts a record and returns it with its store-assigned identity.
    fn insert(&mut self, record: &NewRecord) -> Result<Record>;

    /// Looks a record up by identity. `Ok(None)` when no row is visible.
    fn select_by_id(&mut self, id: RecordId) -> Result<Option<Record>>;

    /// Scans every visible record, ordered by identity.
    fn select_all(&mut self) -> Result<Vec<Record>>;

    /// Scans the visible records whose rating is strictly above `threshold`.
    fn select_rating_above(&mut self, threshold: i32) -> Result<Vec<Record>>;

    /// Overwrites the row with the record's identity.
    ///
    /// # Returns
    ///
    /// Returns `Ok(true)` if a row was updated and `Ok(false)` if no row with
    /// that identity is visible to the transaction.
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::SerializationFailure` if the store detects a
    /// concurrent update it cannot serialize.
    fn update(&mut self, record: &Record) -> Result<bool>;

    /// Deletes every visible record and returns how many rows were removed.
    fn delete_all(&mut self) -> Result<u64>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns `AnomalyError::SerializationFailure` if the store rejected the
    /// commit. The transaction is over either way.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the transaction back, discarding every change it made.
    fn rollback(self: Box<Self>) -> Result<()>;
}
