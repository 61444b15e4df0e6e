//! The fixed operation sequences each actor performs inside its transaction.
//!
//! Reader choreographies follow one shape: take the baseline, signal `aux`,
//! block on `release`, take the final read. They are plain functions over a
//! [RecordRepository]; the caller decides the isolation level by choosing the
//! transaction it runs them in.

use std::time::Duration;

use log::{debug, info};

use crate::errors::Result;
use crate::latch::{Latch, Signal};
use crate::record::{NewRecord, Record, RecordId};
use crate::repository::RecordRepository;
use crate::trace::{Actor, Step, Trace};

/// T1's half of the rendezvous.
pub struct Rendezvous {
    /// Fired once the baseline is taken and T1 is about to block.
    pub aux: Signal,
    /// Opened by the driver when T1 may take its final read.
    pub release: Latch,
    /// Bound on the wait for `release`.
    pub timeout: Duration,
}

impl Rendezvous {
    /// Signals `aux` and blocks until `release` opens.
    ///
    /// A timeout or an interruption is returned as an error so the enclosing
    /// transaction is rolled back.
    pub fn pause(&self, trace: &Trace) -> Result<()> {
        // Recorded first: the driver reacts to the signal immediately.
        trace.record(Actor::T1, Step::SignalledAux);
        self.aux.signal();
        self.release.wait(self.timeout)?;
        trace.record(Actor::T1, Step::Resumed);
        Ok(())
    }
}

/// A baseline observation and the final one, taken in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPair<T> {
    pub baseline: T,
    pub last: T,
}

/// How the non-repeatable read choreography forgets its baseline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    /// Evict only the record under test.
    #[default]
    Detach,
    /// Evict the whole session cache.
    Clear,
    /// Evict nothing. The final read is then served from the session cache.
    Keep,
}

/// Dirty read: no baseline, T1's only read happens while T2's write is
/// still uncommitted.
pub fn dirty_read(
    repository: &mut RecordRepository<'_>,
    rendezvous: &Rendezvous,
    trace: &Trace,
    id: RecordId,
) -> Result<Record> {
    rendezvous.pause(trace)?;
    let record = repository.find_by_id(id)?;
    trace.record(Actor::T1, Step::FinalRead);
    debug!("T1 read {} at {}: {:?}", id, repository.level(), record);
    Ok(record)
}

/// Non-repeatable read: read the record, evict it, pause, read it again.
pub fn non_repeatable_read(
    repository: &mut RecordRepository<'_>,
    rendezvous: &Rendezvous,
    trace: &Trace,
    id: RecordId,
    eviction: Eviction,
) -> Result<ReadPair<Record>> {
    let baseline = repository.find_by_id(id)?;
    trace.record(Actor::T1, Step::BaselineRead);
    info!("T1 record in the beginning: {:?}", baseline);

    match eviction {
        Eviction::Detach => {
            repository.detach(id);
        }
        Eviction::Clear => repository.clear(),
        Eviction::Keep => {}
    }

    rendezvous.pause(trace)?;
    let last = repository.find_by_id(id)?;
    trace.record(Actor::T1, Step::FinalRead);
    Ok(ReadPair { baseline, last })
}

/// Phantom read: scan everything, pause, scan again.
pub fn phantom_read(
    repository: &mut RecordRepository<'_>,
    rendezvous: &Rendezvous,
    trace: &Trace,
) -> Result<ReadPair<Vec<Record>>> {
    let baseline = repository.find_all()?;
    trace.record(Actor::T1, Step::BaselineRead);
    debug!("T1 records in the beginning: {:?}", baseline);

    rendezvous.pause(trace)?;
    let last = repository.find_all()?;
    trace.record(Actor::T1, Step::FinalRead);
    Ok(ReadPair { baseline, last })
}

/// T2: set the rating of `id`. Committing is left to the enclosing
/// transaction.
pub fn update_rating(
    repository: &mut RecordRepository<'_>,
    trace: &Trace,
    id: RecordId,
    rating: i32,
) -> Result<Record> {
    let mut record = repository.find_by_id(id)?;
    record.rating = rating;
    let saved = repository.save(&record)?;
    trace.record(Actor::T2, Step::Mutated);
    Ok(saved)
}

/// T2 for the dirty read scenario: set the rating, tell the driver the write
/// is in place, then keep the transaction open until `hold` opens.
pub fn update_rating_and_hold(
    repository: &mut RecordRepository<'_>,
    trace: &Trace,
    id: RecordId,
    rating: i32,
    written: &Signal,
    hold: &Latch,
    timeout: Duration,
) -> Result<Record> {
    let saved = update_rating(repository, trace, id, rating)?;
    trace.record(Actor::T2, Step::SignalledWritten);
    written.signal();
    hold.wait(timeout)?;
    Ok(saved)
}

/// T2 for the phantom read scenario: insert `records`.
pub fn add_records(
    repository: &mut RecordRepository<'_>,
    trace: &Trace,
    records: Vec<NewRecord>,
) -> Result<Vec<Record>> {
    let created = repository.create_all(records)?;
    trace.record(Actor::T2, Step::Mutated);
    Ok(created)
}
