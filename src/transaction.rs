use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::errors::Result;
use crate::isolation::IsolationLevel;
use crate::repository::RecordRepository;
use crate::storage::Storage;

/// Runs units of work inside transactions at an explicit isolation level.
///
/// The runner is the only place where transactions are opened and closed.
/// A unit of work receives a [RecordRepository] bound to the open transaction
/// and never sees the transaction itself, so it cannot commit or roll back on
/// its own.
///
/// The runner never retries. A serialization failure raised by the store,
/// either from a statement or from the commit, reaches the caller unchanged.
pub struct TransactionRunner {
    /// The store every transaction is opened on.
    storage: Arc<dyn Storage>,
    /// Level used by [TransactionRunner::run], i.e. by the writer actor.
    default_isolation: IsolationLevel,
    /// Local counter, only used to correlate log lines of one transaction.
    transaction_counter: AtomicU64,
}

impl TransactionRunner {
    /// Creates a runner over `storage`.
    ///
    /// # Arguments
    ///
    /// * `storage` - The store to open transactions on.
    /// * `default_isolation` - The level used when the caller does not pick one.
    pub fn new(storage: Arc<dyn Storage>, default_isolation: IsolationLevel) -> Self {
        Self {
            storage,
            default_isolation,
            transaction_counter: AtomicU64::new(0),
        }
    }

    /// Runs `work` inside a transaction opened at `level`.
    ///
    /// On `Ok` the transaction is committed and the value returned. On `Err`
    /// the transaction is rolled back and the error returned as is. If `work`
    /// panics, the transaction is dropped and the storage backend rolls it
    /// back.
    ///
    /// # Arguments
    ///
    /// * `level` - The isolation level to open the transaction at.
    /// * `work` - The unit of work. It gets a repository bound to the
    ///   transaction.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, the error of `begin`, or the error of the
    /// commit. A failed rollback is only logged, the error of `work` is returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use isolation_anomalies::prelude::*;
    ///
    /// fn bump(runner: &TransactionRunner, id: RecordId) -> Result<Record> {
    ///     runner.run_in_transaction(IsolationLevel::Serializable, |repository| {
    ///         let mut record = repository.find_by_id(id)?;
    ///         record.rating += 1;
    ///         repository.save(&record)
    ///     })
    /// }
    /// ```
    pub fn run_in_transaction<T, F>(&self, level: IsolationLevel, work: F) -> Result<T>
    where
        F: FnOnce(&mut RecordRepository<'_>) -> Result<T>,
    {
        let txn_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let mut txn = self.storage.begin(level)?;
        debug!("Transaction {} started at {}", txn_id, level);

        let outcome = {
            let mut repository = RecordRepository::new(txn.as_mut());
            work(&mut repository)
        };

        match outcome {
            Ok(value) => {
                if let Err(err) = txn.commit() {
                    warn!("Transaction {} failed to commit: {}", txn_id, err);
                    return Err(err);
                }
                debug!("Transaction {} committed", txn_id);
                Ok(value)
            }
            Err(err) => {
                warn!("Transaction {} rolling back: {}", txn_id, err);
                if let Err(rollback_err) = txn.rollback() {
                    warn!(
                        "Transaction {} rollback failed: {}",
                        txn_id, rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Runs `work` at the runner's default isolation level.
    pub fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut RecordRepository<'_>) -> Result<T>,
    {
        self.run_in_transaction(self.default_isolation, work)
    }
}
