use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self as channel, RecvTimeoutError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::choreography::{self, Eviction, Rendezvous};
use crate::config::Timeouts;
use crate::errors::{AnomalyError, Result};
use crate::fixtures::{self, NEW_RATING};
use crate::isolation::IsolationLevel;
use crate::latch::{Latch, Signal};
use crate::record::{Record, RecordId};
use crate::repository::RecordRepository;
use crate::trace::{Actor, Event, Step, Trace};
use crate::transaction::TransactionRunner;

/// The three anomalies the harness reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    DirtyRead,
    NonRepeatableRead,
    PhantomRead,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [
        Scenario::DirtyRead,
        Scenario::NonRepeatableRead,
        Scenario::PhantomRead,
    ];
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::DirtyRead => f.write_str("dirty read"),
            Scenario::NonRepeatableRead => f.write_str("non-repeatable read"),
            Scenario::PhantomRead => f.write_str("phantom read"),
        }
    }
}

/// Whether `scenario` run at `level` should show its anomaly, for a store that
/// runs read-uncommitted as read-committed and whose repeatable-read is
/// snapshot based.
///
/// | level            | dirty | non-repeatable | phantom |
/// |------------------|-------|----------------|---------|
/// | read-uncommitted | no    | yes            | yes     |
/// | read-committed   | no    | yes            | yes     |
/// | repeatable-read  | no    | no             | no      |
/// | serializable     | no    | no             | no      |
pub fn expected_anomaly(scenario: Scenario, level: IsolationLevel) -> bool {
    match scenario {
        Scenario::DirtyRead => false,
        Scenario::NonRepeatableRead | Scenario::PhantomRead => {
            level.effective() == IsolationLevel::ReadCommitted
        }
    }
}

/// What T1 saw, next to what it would have seen without interference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScenarioOutcome {
    DirtyRead {
        seeded_rating: i32,
        written_rating: i32,
        observed_rating: i32,
    },
    NonRepeatableRead {
        baseline_rating: i32,
        final_rating: i32,
        written_rating: i32,
    },
    PhantomRead {
        baseline_count: usize,
        final_count: usize,
        inserted: usize,
        /// Identities of the baseline scan, in scan order.
        baseline_ids: Vec<RecordId>,
        /// Identities of the final scan, in scan order.
        final_ids: Vec<RecordId>,
    },
    /// The store aborted T1 with a serialization failure. Only accepted at
    /// serializable, where it is one of the legitimate outcomes.
    Aborted { reason: String },
}

impl ScenarioOutcome {
    pub fn anomaly_observed(&self) -> bool {
        match self {
            ScenarioOutcome::DirtyRead {
                seeded_rating,
                written_rating,
                observed_rating,
            } => observed_rating == written_rating && observed_rating != seeded_rating,
            ScenarioOutcome::NonRepeatableRead {
                baseline_rating,
                final_rating,
                ..
            } => baseline_rating != final_rating,
            ScenarioOutcome::PhantomRead {
                baseline_count,
                final_count,
                baseline_ids,
                final_ids,
                ..
            } => {
                // A delete paired with an insert keeps the count but not the set.
                let before: BTreeSet<_> = baseline_ids.iter().collect();
                let after: BTreeSet<_> = final_ids.iter().collect();
                baseline_count != final_count || before != after
            }
            ScenarioOutcome::Aborted { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub level: IsolationLevel,
    pub outcome: ScenarioOutcome,
    pub expected_anomaly: bool,
    pub trace: Vec<Event>,
}

impl ScenarioReport {
    pub fn anomaly_observed(&self) -> bool {
        self.outcome.anomaly_observed()
    }

    pub fn matches_expectation(&self) -> bool {
        self.anomaly_observed() == self.expected_anomaly
    }

    /// Turns a deviation from the expected matrix into an error.
    pub fn check(self) -> Result<Self> {
        if self.matches_expectation() {
            Ok(self)
        } else {
            Err(AnomalyError::ExpectationMismatch(format!(
                "{} at {}: expected anomaly = {}, got {:?}",
                self.scenario, self.level, self.expected_anomaly, self.outcome
            )))
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} / {}] expected anomaly: {}, observed: {} ({:?})",
            self.level,
            self.scenario,
            self.expected_anomaly,
            self.anomaly_observed(),
            self.outcome
        )
    }
}

enum Settled<T> {
    Done(T),
    Aborted(String),
}

/// Accepts a serialization failure as an outcome at serializable only.
fn settle<T>(level: IsolationLevel, result: Result<T>) -> Result<Settled<T>> {
    match result {
        Ok(value) => Ok(Settled::Done(value)),
        Err(err) if level == IsolationLevel::Serializable && err.is_serialization_failure() => {
            info!("T1 aborted by the store at {}: {}", level, err);
            Ok(Settled::Aborted(err.to_string()))
        }
        Err(err) => Err(err),
    }
}

/// A running actor thread whose result is handed back over a channel, so the
/// driver can bound how long it waits for it.
struct ActorHandle<T> {
    actor: Actor,
    results: channel::Receiver<thread::Result<Result<T>>>,
}

impl<T> ActorHandle<T> {
    fn join(self, timeout: Duration) -> Result<T> {
        match self.results.recv_timeout(timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => {
                Err(AnomalyError::ActorPanicked { actor: self.actor })
            }
            Err(RecvTimeoutError::Timeout) => Err(AnomalyError::ActorTimeout {
                actor: self.actor,
                waited: timeout,
            }),
        }
    }
}

fn spawn_actor<T, F>(actor: Actor, work: F) -> Result<ActorHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (sender, results) = channel::bounded(1);
    thread::Builder::new()
        .name(actor.to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            // The driver may have stopped listening after a timeout.
            let _ = sender.send(result);
        })?;
    Ok(ActorHandle { actor, results })
}

/// Sequences T1 and T2 so each anomaly is observed deterministically.
///
/// For every scenario the driver seeds one record, starts T1 on its own
/// thread, waits until T1 has taken its baseline and parked on `release`,
/// runs T2, and only then opens `release`. In the dirty read scenario T2 keeps
/// its transaction open on a second latch until T1 has finished, so T1 reads
/// while T2's write is still uncommitted.
///
/// Every wait is bounded by [Timeouts]. When anything fails, the latches the
/// other actor could still be parked on are interrupted so that actor rolls
/// back instead of lingering.
pub struct ScenarioDriver {
    runner: Arc<TransactionRunner>,
    timeouts: Timeouts,
}

impl ScenarioDriver {
    pub fn new(runner: Arc<TransactionRunner>, timeouts: Timeouts) -> Self {
        Self { runner, timeouts }
    }

    /// Inserts the record the scenarios work on.
    pub fn seed(&self) -> Result<Record> {
        self.runner.run(|repository| repository.create(fixtures::book1()))
    }

    /// Deletes every record.
    pub fn teardown(&self) -> Result<u64> {
        self.runner.run(|repository| repository.delete_all())
    }

    /// Seeds, executes `scenario` at `level`, and tears down, even when the
    /// scenario failed.
    pub fn run(&self, scenario: Scenario, level: IsolationLevel) -> Result<ScenarioReport> {
        let seeded = self.seed()?;
        let report = self.execute(scenario, level, &seeded);
        match self.teardown() {
            Ok(removed) => debug!("Teardown removed {} records", removed),
            Err(err) => {
                warn!("Teardown failed: {}", err);
                if report.is_ok() {
                    return Err(err);
                }
            }
        }
        let report = report?;
        info!("{}", report);
        Ok(report)
    }

    /// Runs every scenario at every isolation level.
    pub fn run_matrix(&self) -> Result<Vec<ScenarioReport>> {
        let mut reports = Vec::with_capacity(Scenario::ALL.len() * IsolationLevel::ALL.len());
        for scenario in Scenario::ALL {
            for level in IsolationLevel::ALL {
                reports.push(self.run(scenario, level)?);
            }
        }
        Ok(reports)
    }

    /// Executes `scenario` at `level` against an already seeded record.
    pub fn execute(
        &self,
        scenario: Scenario,
        level: IsolationLevel,
        seeded: &Record,
    ) -> Result<ScenarioReport> {
        let trace = Trace::new();
        let outcome = match scenario {
            Scenario::DirtyRead => self.dirty_read(level, seeded, &trace)?,
            Scenario::NonRepeatableRead => self.non_repeatable_read(level, seeded, &trace)?,
            Scenario::PhantomRead => self.phantom_read(level, &trace)?,
        };
        Ok(ScenarioReport {
            scenario,
            level,
            outcome,
            expected_anomaly: expected_anomaly(scenario, level),
            trace: trace.events(),
        })
    }

    fn dirty_read(
        &self,
        level: IsolationLevel,
        seeded: &Record,
        trace: &Trace,
    ) -> Result<ScenarioOutcome> {
        let aux = Latch::new("aux", 1);
        let release = Latch::new("release", 1);
        let written = Latch::new("written", 1);
        let hold = Latch::new("hold", 1);
        let release_signal = release.signaller();
        let hold_signal = hold.signaller();
        let rendezvous = self.rendezvous(&aux, release);
        let id = seeded.id();

        let t1 = {
            let runner = Arc::clone(&self.runner);
            let trace = trace.clone();
            spawn_actor(Actor::T1, move || {
                let record = runner.run_in_transaction(level, |repository| {
                    trace.record(Actor::T1, Step::Begin);
                    choreography::dirty_read(repository, &rendezvous, &trace, id)
                })?;
                trace.record(Actor::T1, Step::Committed);
                Ok(record)
            })?
        };

        if let Err(err) = self.observe(&aux, Step::ObservedAux, trace) {
            return Err(self.abandon(t1, release_signal, err));
        }

        let t2 = {
            let runner = Arc::clone(&self.runner);
            let trace = trace.clone();
            let written_signal = written.signaller();
            let timeout = self.timeouts.barrier;
            spawn_actor(Actor::T2, move || {
                trace.record(Actor::T2, Step::Begin);
                let saved = runner.run(|repository| {
                    choreography::update_rating_and_hold(
                        repository,
                        &trace,
                        id,
                        NEW_RATING,
                        &written_signal,
                        &hold,
                        timeout,
                    )
                })?;
                trace.record(Actor::T2, Step::Committed);
                Ok(saved)
            })
        };
        let t2 = match t2 {
            Ok(handle) => handle,
            Err(err) => return Err(self.abandon(t1, release_signal, err)),
        };

        if let Err(err) = self.observe(&written, Step::ObservedWritten, trace) {
            let err = self.abandon(t2, hold_signal, err);
            return Err(self.abandon(t1, release_signal, err));
        }

        // T2 has written but not committed.
        trace.record(Actor::Driver, Step::Released);
        release_signal.signal();

        let observed = match settle(level, t1.join(self.timeouts.actor)) {
            Ok(settled) => settled,
            Err(err) => return Err(self.abandon(t2, hold_signal, err)),
        };

        trace.record(Actor::Driver, Step::ReleasedWriter);
        hold_signal.signal();
        t2.join(self.timeouts.actor)?;

        match observed {
            Settled::Done(record) => {
                self.verify_order(Scenario::DirtyRead, trace, true)?;
                Ok(ScenarioOutcome::DirtyRead {
                    seeded_rating: seeded.rating,
                    written_rating: NEW_RATING,
                    observed_rating: record.rating,
                })
            }
            Settled::Aborted(reason) => {
                self.verify_order(Scenario::DirtyRead, trace, false)?;
                Ok(ScenarioOutcome::Aborted { reason })
            }
        }
    }

    fn non_repeatable_read(
        &self,
        level: IsolationLevel,
        seeded: &Record,
        trace: &Trace,
    ) -> Result<ScenarioOutcome> {
        let aux = Latch::new("aux", 1);
        let release = Latch::new("release", 1);
        let release_signal = release.signaller();
        let rendezvous = self.rendezvous(&aux, release);
        let id = seeded.id();

        let t1 = {
            let runner = Arc::clone(&self.runner);
            let trace = trace.clone();
            spawn_actor(Actor::T1, move || {
                let reads = runner.run_in_transaction(level, |repository| {
                    trace.record(Actor::T1, Step::Begin);
                    choreography::non_repeatable_read(
                        repository,
                        &rendezvous,
                        &trace,
                        id,
                        Eviction::Detach,
                    )
                })?;
                trace.record(Actor::T1, Step::Committed);
                Ok(reads)
            })?
        };

        if let Err(err) = self.observe(&aux, Step::ObservedAux, trace) {
            return Err(self.abandon(t1, release_signal, err));
        }

        if let Err(err) = self.run_writer(trace, |repository, trace| {
            choreography::update_rating(repository, trace, id, NEW_RATING)
        }) {
            return Err(self.abandon(t1, release_signal, err));
        }

        trace.record(Actor::Driver, Step::Released);
        release_signal.signal();

        match settle(level, t1.join(self.timeouts.actor))? {
            Settled::Done(reads) => {
                self.verify_order(Scenario::NonRepeatableRead, trace, true)?;
                Ok(ScenarioOutcome::NonRepeatableRead {
                    baseline_rating: reads.baseline.rating,
                    final_rating: reads.last.rating,
                    written_rating: NEW_RATING,
                })
            }
            Settled::Aborted(reason) => {
                self.verify_order(Scenario::NonRepeatableRead, trace, false)?;
                Ok(ScenarioOutcome::Aborted { reason })
            }
        }
    }

    fn phantom_read(&self, level: IsolationLevel, trace: &Trace) -> Result<ScenarioOutcome> {
        let aux = Latch::new("aux", 1);
        let release = Latch::new("release", 1);
        let release_signal = release.signaller();
        let rendezvous = self.rendezvous(&aux, release);

        let t1 = {
            let runner = Arc::clone(&self.runner);
            let trace = trace.clone();
            spawn_actor(Actor::T1, move || {
                let reads = runner.run_in_transaction(level, |repository| {
                    trace.record(Actor::T1, Step::Begin);
                    choreography::phantom_read(repository, &rendezvous, &trace)
                })?;
                trace.record(Actor::T1, Step::Committed);
                Ok(reads)
            })?
        };

        if let Err(err) = self.observe(&aux, Step::ObservedAux, trace) {
            return Err(self.abandon(t1, release_signal, err));
        }

        let inserted = match self.run_writer(trace, |repository, trace| {
            choreography::add_records(repository, trace, fixtures::phantom_rows())
        }) {
            Ok(created) => created.len(),
            Err(err) => return Err(self.abandon(t1, release_signal, err)),
        };

        trace.record(Actor::Driver, Step::Released);
        release_signal.signal();

        match settle(level, t1.join(self.timeouts.actor))? {
            Settled::Done(reads) => {
                self.verify_order(Scenario::PhantomRead, trace, true)?;
                Ok(ScenarioOutcome::PhantomRead {
                    baseline_count: reads.baseline.len(),
                    final_count: reads.last.len(),
                    inserted,
                    baseline_ids: reads.baseline.iter().map(Record::id).collect(),
                    final_ids: reads.last.iter().map(Record::id).collect(),
                })
            }
            Settled::Aborted(reason) => {
                self.verify_order(Scenario::PhantomRead, trace, false)?;
                Ok(ScenarioOutcome::Aborted { reason })
            }
        }
    }

    fn rendezvous(&self, aux: &Latch, release: Latch) -> Rendezvous {
        Rendezvous {
            aux: aux.signaller(),
            release,
            timeout: self.timeouts.barrier,
        }
    }

    /// Runs T2 synchronously on the driver thread and commits it.
    fn run_writer<T, F>(&self, trace: &Trace, work: F) -> Result<T>
    where
        F: FnOnce(&mut RecordRepository<'_>, &Trace) -> Result<T>,
    {
        trace.record(Actor::T2, Step::Begin);
        let value = self.runner.run(|repository| work(repository, trace))?;
        trace.record(Actor::T2, Step::Committed);
        Ok(value)
    }

    fn observe(&self, latch: &Latch, step: Step, trace: &Trace) -> Result<()> {
        latch.wait(self.timeouts.barrier)?;
        trace.record(Actor::Driver, step);
        Ok(())
    }

    /// Interrupts whatever `actor` may be parked on by dropping `gate`, waits
    /// for it to unwind, and picks the error to report. An interruption only
    /// means the actor failed first, so the actor's own error is preferred.
    fn abandon<T>(&self, actor: ActorHandle<T>, gate: Signal, cause: AnomalyError) -> AnomalyError {
        warn!("Abandoning {} after: {}", actor.actor, cause);
        drop(gate);
        match (cause, actor.join(self.timeouts.actor)) {
            (AnomalyError::Interrupted { .. }, Err(actor_err)) => actor_err,
            (cause, _) => cause,
        }
    }

    fn verify_order(&self, scenario: Scenario, trace: &Trace, t1_finished: bool) -> Result<()> {
        trace.ensure_before((Actor::T1, Step::SignalledAux), (Actor::Driver, Step::ObservedAux))?;
        trace.ensure_before((Actor::Driver, Step::ObservedAux), (Actor::T2, Step::Begin))?;
        trace.ensure_before((Actor::Driver, Step::Released), (Actor::T1, Step::Resumed))?;
        match scenario {
            Scenario::DirtyRead => {
                trace.ensure_before((Actor::T2, Step::Mutated), (Actor::Driver, Step::Released))?;
                trace.ensure_before((Actor::Driver, Step::Released), (Actor::T2, Step::Committed))?;
                if t1_finished {
                    trace.ensure_before((Actor::T1, Step::FinalRead), (Actor::T2, Step::Committed))?;
                }
            }
            Scenario::NonRepeatableRead | Scenario::PhantomRead => {
                trace.ensure_before((Actor::T1, Step::BaselineRead), (Actor::T2, Step::Begin))?;
                trace.ensure_before((Actor::T2, Step::Committed), (Actor::Driver, Step::Released))?;
                if t1_finished {
                    trace.ensure_before((Actor::T1, Step::Resumed), (Actor::T1, Step::FinalRead))?;
                }
            }
        }
        Ok(())
    }
}
