use std::sync::Arc;
use std::thread;
use std::time::Duration;

use isolation_anomalies::choreography::{self, Eviction, Rendezvous};
use isolation_anomalies::fixtures::{self, NEW_RATING};
use isolation_anomalies::prelude::*;
use rand::Rng;

mod common;

use common::{
    init_logger, position, setup_driver, setup_driver_with, test_timeouts, MockStorage,
};

#[test]
fn test_non_repeatable_read_writer_runs_between_reads() {
    init_logger();
    let (_storage, driver) = setup_driver(test_timeouts());
    let report = driver
        .run(Scenario::NonRepeatableRead, IsolationLevel::ReadCommitted)
        .unwrap();
    let events = &report.trace;

    let baseline = position(events, Actor::T1, Step::BaselineRead);
    let signalled = position(events, Actor::T1, Step::SignalledAux);
    let writer_begin = position(events, Actor::T2, Step::Begin);
    let writer_commit = position(events, Actor::T2, Step::Committed);
    let released = position(events, Actor::Driver, Step::Released);
    let resumed = position(events, Actor::T1, Step::Resumed);
    let final_read = position(events, Actor::T1, Step::FinalRead);

    assert!(baseline < signalled);
    assert!(signalled < writer_begin);
    assert!(writer_commit < released);
    assert!(released < resumed);
    assert!(resumed < final_read);
}

#[test]
fn test_phantom_read_writer_commits_before_release() {
    let (_storage, driver) = setup_driver(test_timeouts());
    let report = driver
        .run(Scenario::PhantomRead, IsolationLevel::RepeatableRead)
        .unwrap();
    let events = &report.trace;

    assert!(
        position(events, Actor::T1, Step::BaselineRead)
            < position(events, Actor::T2, Step::Mutated)
    );
    assert!(
        position(events, Actor::T2, Step::Committed)
            < position(events, Actor::T1, Step::FinalRead)
    );
}

#[test]
fn test_dirty_read_happens_while_writer_is_uncommitted() {
    let (_storage, driver) = setup_driver(test_timeouts());
    let report = driver
        .run(Scenario::DirtyRead, IsolationLevel::ReadUncommitted)
        .unwrap();
    let events = &report.trace;

    let mutated = position(events, Actor::T2, Step::Mutated);
    let final_read = position(events, Actor::T1, Step::FinalRead);
    let writer_commit = position(events, Actor::T2, Step::Committed);

    assert!(mutated < final_read);
    assert!(final_read < writer_commit);
    assert!(
        position(events, Actor::Driver, Step::ReleasedWriter) < writer_commit
    );
}

#[test]
fn test_outcome_does_not_depend_on_timing() {
    let mut rng = rand::rng();
    for _ in 0..3 {
        let delay = Duration::from_millis(rng.random_range(0..30));
        let (_storage, driver) =
            setup_driver_with(MockStorage::with_read_delay(delay), test_timeouts());
        for level in IsolationLevel::ALL {
            let report = driver.run(Scenario::NonRepeatableRead, level).unwrap();
            assert!(report.matches_expectation(), "{} (delay {:?})", report, delay);
        }
    }
}

#[test]
fn test_missing_record_propagates_not_found() {
    init_logger();
    let (storage, driver) = setup_driver(test_timeouts());
    let missing = driver.seed().unwrap();
    driver.teardown().unwrap();

    let err = driver
        .execute(Scenario::NonRepeatableRead, IsolationLevel::ReadCommitted, &missing)
        .unwrap_err();

    assert!(matches!(err, AnomalyError::NotFound(id) if id == missing.id()));
    // The writer never ran.
    assert!(storage.rows().is_empty());
    assert_eq!(storage.rollbacks(), 1);
}

#[test]
fn test_slow_reader_fails_with_barrier_timeout() {
    init_logger();
    let timeouts = Timeouts {
        barrier: Duration::from_millis(50),
        actor: Duration::from_secs(5),
    };
    let (storage, driver) =
        setup_driver_with(MockStorage::with_read_delay(Duration::from_millis(300)), timeouts);
    let seeded = driver.seed().unwrap();

    let err = driver
        .execute(Scenario::PhantomRead, IsolationLevel::ReadCommitted, &seeded)
        .unwrap_err();

    assert!(
        matches!(err, AnomalyError::BarrierTimeout { barrier: "aux", .. }),
        "unexpected error {:?}",
        err
    );
    assert!(err.is_harness_failure());
    // T1 woke up interrupted and rolled back before `execute` returned.
    assert_eq!(storage.rollbacks(), 1);
}

#[test]
fn test_barrier_timeout_rolls_back_pending_writes() {
    let (storage, runner) = common::setup_runner();
    let release = Latch::new("release", 1);
    let _never_fired = release.signaller();

    let err = runner
        .run_in_transaction(IsolationLevel::ReadCommitted, |repository| {
            repository.create(fixtures::book1())?;
            release.wait(Duration::from_millis(20))?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, AnomalyError::BarrierTimeout { barrier: "release", .. }));
    assert!(err.is_harness_failure());
    assert_eq!(storage.rollbacks(), 1);
    assert!(storage.rows().is_empty());
}

#[test]
fn test_pause_times_out_when_never_released() {
    let aux = Latch::new("aux", 1);
    let release = Latch::new("release", 1);
    let _release_signal = release.signaller();
    let rendezvous = Rendezvous {
        aux: aux.signaller(),
        release,
        timeout: Duration::from_millis(30),
    };
    let trace = Trace::new();

    let err = rendezvous.pause(&trace).unwrap_err();

    assert!(matches!(err, AnomalyError::BarrierTimeout { barrier: "release", .. }));
    assert!(aux.is_open());
    assert!(trace.position(Actor::T1, Step::Resumed).is_none());
}

/// Runs the non-repeatable read choreography with `eviction` against a writer
/// that commits while T1 is parked, and returns T1's final rating.
fn final_rating_with(eviction: Eviction) -> i32 {
    let (storage, runner) = common::setup_runner();
    let runner = Arc::new(runner);
    let seeded = runner
        .run(|repository| repository.create(fixtures::book1()))
        .unwrap();
    let id = seeded.id();

    let aux = Latch::new("aux", 1);
    let release = Latch::new("release", 1);
    let release_signal = release.signaller();
    let rendezvous = Rendezvous {
        aux: aux.signaller(),
        release,
        timeout: Duration::from_secs(5),
    };
    let trace = Trace::new();

    let reader = {
        let runner = Arc::clone(&runner);
        let trace = trace.clone();
        thread::spawn(move || {
            runner.run_in_transaction(IsolationLevel::ReadCommitted, |repository| {
                choreography::non_repeatable_read(repository, &rendezvous, &trace, id, eviction)
            })
        })
    };

    aux.wait(Duration::from_secs(5)).unwrap();
    runner
        .run(|repository| choreography::update_rating(repository, &trace, id, NEW_RATING))
        .unwrap();
    release_signal.signal();

    let reads = reader.join().unwrap().unwrap();
    assert_eq!(reads.baseline.rating, 0);
    assert_eq!(storage.get(id).unwrap().rating, NEW_RATING);
    reads.last.rating
}

#[test]
fn test_eviction_strategies() {
    assert_eq!(final_rating_with(Eviction::Detach), NEW_RATING);
    assert_eq!(final_rating_with(Eviction::Clear), NEW_RATING);
    // Without eviction the session cache masks the committed update.
    assert_eq!(final_rating_with(Eviction::Keep), 0);
}
