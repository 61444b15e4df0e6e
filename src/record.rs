use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned identity of a [Record]. Never reused once handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A persisted book. The identity is fixed at creation; the other fields are
/// plain data that only the writer actor changes during a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    pub title: String,
    pub author: String,
    pub rating: i32,
}

impl Record {
    /// Builds a record from a row the store returned.
    pub(crate) fn new(
        id: RecordId,
        title: impl Into<String>,
        author: impl Into<String>,
        rating: i32,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            rating,
        }
    }

    /// Attaches the identity a [Storage](crate::storage::Storage) backend just
    /// assigned to an unsaved record.
    ///
    /// This is the only public way to build a [Record]. It exists for
    /// [StorageTransaction::insert](crate::storage::StorageTransaction::insert)
    /// implementations; callers of the harness receive records from the
    /// repository.
    pub fn with_identity(id: RecordId, record: NewRecord) -> Self {
        Self {
            id,
            title: record.title,
            author: record.author,
            rating: record.rating,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }
}

/// A record that has not been persisted yet and therefore has no identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub title: String,
    pub author: String,
    pub rating: i32,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, author: impl Into<String>, rating: i32) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            rating,
        }
    }
}
