use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{AnomalyError, Result};

/// Participants of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    /// The reader whose observations are under test.
    T1,
    /// The writer.
    T2,
    /// The thread sequencing both of them.
    Driver,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::T1 => f.write_str("T1"),
            Actor::T2 => f.write_str("T2"),
            Actor::Driver => f.write_str("driver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Begin,
    BaselineRead,
    SignalledAux,
    ObservedAux,
    Mutated,
    SignalledWritten,
    ObservedWritten,
    Released,
    Resumed,
    FinalRead,
    ReleasedWriter,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub actor: Actor,
    pub step: Step,
}

/// Ordered log of choreography steps shared by all actors of one scenario.
///
/// Sequence numbers are handed out under the same lock that appends the
/// event, so the order of the log is the real order in which the steps
/// completed.
#[derive(Clone, Default)]
pub struct Trace {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, actor: Actor, step: Step) {
        let mut events = self.events.lock();
        let seq = events.len() as u64;
        events.push(Event { seq, actor, step });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Sequence number of the first occurrence of `step` by `actor`.
    pub fn position(&self, actor: Actor, step: Step) -> Option<u64> {
        self.events
            .lock()
            .iter()
            .find(|event| event.actor == actor && event.step == step)
            .map(|event| event.seq)
    }

    /// Fails with `ChoreographyViolation` unless `earlier` was recorded, and
    /// `later` was either not recorded or recorded after it.
    pub fn ensure_before(&self, earlier: (Actor, Step), later: (Actor, Step)) -> Result<()> {
        let first = self.position(earlier.0, earlier.1).ok_or_else(|| {
            AnomalyError::ChoreographyViolation(format!(
                "{} never reached {:?}",
                earlier.0, earlier.1
            ))
        })?;
        match self.position(later.0, later.1) {
            Some(second) if second < first => Err(AnomalyError::ChoreographyViolation(format!(
                "{} {:?} (#{}) happened before {} {:?} (#{})",
                later.0, later.1, second, earlier.0, earlier.1, first
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events.lock().iter()).finish()
    }
}
