use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AnomalyError;

/// Defines the transaction isolation levels a scenario can be run at.
///
/// The names follow the SQL standard regardless of what the backing store
/// actually implements for each level. The harness never emulates a level
/// itself; it only asks the store to open the transaction at the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// **Read Uncommitted:**
    ///
    /// The standard allows observing uncommitted writes of concurrent
    /// transactions. Mainstream engines (PostgreSQL among them) run this level
    /// as [IsolationLevel::ReadCommitted], so no dirty read is ever visible.
    ReadUncommitted,
    /// **Read Committed:**
    ///
    /// Every statement sees the data committed before that statement began.
    /// Re-reading a row or re-scanning a range inside the same transaction may
    /// observe changes committed in between: non-repeatable and phantom reads
    /// are possible.
    ReadCommitted,
    /// **Repeatable Read:**
    ///
    /// Rows read once keep their value for the rest of the transaction. The
    /// standard still permits phantoms, but snapshot-based engines take one
    /// snapshot at the first statement, which hides concurrent inserts too.
    RepeatableRead,
    /// **Serializable:**
    ///
    /// The outcome is equivalent to some serial execution. The store may abort
    /// a transaction with a serialization failure instead of letting an
    /// anomaly through; that failure is surfaced, never retried.
    Serializable,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// The level name as it appears in `BEGIN ISOLATION LEVEL ...`.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// The level the store actually runs when asked for `self`.
    pub fn effective(self) -> IsolationLevel {
        match self {
            IsolationLevel::ReadUncommitted => IsolationLevel::ReadCommitted,
            other => other,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

impl FromStr for IsolationLevel {
    type Err = AnomalyError;

    /// Accepts `read-committed`, `READ_COMMITTED`, `read committed` and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | ' ' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "read-uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(AnomalyError::Config(format!(
                "unknown isolation level `{}`",
                s
            ))),
        }
    }
}
