//! Deterministic reproduction of transaction isolation anomalies.
//!
//! Two actors run against the same external store: T1 reads inside a
//! transaction at the isolation level under test, T2 writes. A pair of
//! one-shot latches forces T1 to take its baseline, park, and resume only
//! once T2 has committed (or, for the dirty read, while T2 still holds its
//! write uncommitted). The anomaly, or its absence, is therefore observed on
//! every run instead of depending on scheduler timing.

pub mod errors;
pub mod isolation;
pub mod record;
pub mod storage;
pub mod repository;
pub mod transaction;
pub mod latch;
pub mod trace;
pub mod choreography;
pub mod scenario;
pub mod config;
pub mod fixtures;
#[cfg(feature = "postgres")]
pub mod pg;

// Re-export key types for easier access
pub use errors::{AnomalyError, Result};
pub use isolation::IsolationLevel;
pub use record::{NewRecord, Record, RecordId};
pub use storage::{Storage, StorageTransaction};
pub use repository::RecordRepository;
pub use transaction::TransactionRunner;
pub use latch::{Latch, Signal};
pub use trace::{Actor, Event, Step, Trace};
pub use scenario::{expected_anomaly, Scenario, ScenarioDriver, ScenarioOutcome, ScenarioReport};
pub use config::{HarnessConfig, StoreConfig, Timeouts};
#[cfg(feature = "postgres")]
pub use pg::PgStorage;

/// Prelude
pub mod prelude {
    pub use crate::choreography::*;
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::isolation::*;
    pub use crate::latch::*;
    pub use crate::record::*;
    pub use crate::repository::*;
    pub use crate::scenario::*;
    pub use crate::storage::*;
    pub use crate::trace::*;
    pub use crate::transaction::*;
    #[cfg(feature = "postgres")]
    pub use crate::pg::*;
}
