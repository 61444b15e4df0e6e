use std::time::Duration;

use thiserror::Error;

use crate::record::RecordId;
use crate::trace::Actor;

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("Record {0} not found")]
    NotFound(RecordId),

    /// The store refused to serialize the transaction (SQLSTATE 40001 / 40P01).
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Barrier `{barrier}` was not opened within {waited:?}")]
    BarrierTimeout {
        barrier: &'static str,
        waited: Duration,
    },

    #[error("Wait on barrier `{barrier}` was interrupted")]
    Interrupted { barrier: &'static str },

    #[error("Actor {actor} did not finish within {waited:?}")]
    ActorTimeout { actor: Actor, waited: Duration },

    #[error("Actor {actor} panicked")]
    ActorPanicked { actor: Actor },

    #[error("Choreography violated: {0}")]
    ChoreographyViolation(String),

    #[error("Unexpected scenario outcome: {0}")]
    ExpectationMismatch(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn actor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl AnomalyError {
    /// Conflict the store detected and rejected. A valid outcome at serializable.
    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, AnomalyError::SerializationFailure(_))
    }

    /// Failures of the harness itself rather than of the store or of an assertion.
    pub fn is_harness_failure(&self) -> bool {
        matches!(
            self,
            AnomalyError::BarrierTimeout { .. }
                | AnomalyError::Interrupted { .. }
                | AnomalyError::ActorTimeout { .. }
                | AnomalyError::ActorPanicked { .. }
                | AnomalyError::ChoreographyViolation(_)
                | AnomalyError::Spawn(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AnomalyError>;
