//! One-shot countdown latch used as the rendezvous between the two actors.
//!
//! A [Latch] is opened once `count` distinct [Signal] holders have fired.
//! Waiting is always bounded: [Latch::wait] takes a timeout and reports a
//! stuck rendezvous as `AnomalyError::BarrierTimeout` instead of hanging.
//!
//! A [Signal] that is dropped without firing interrupts the latch. Every
//! current and future waiter then fails with `AnomalyError::Interrupted`, so an
//! actor that errors out before reaching its rendezvous point wakes the other
//! side immediately instead of letting it run into the timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::errors::{AnomalyError, Result};

struct LatchState {
    remaining: usize,
    interrupted: bool,
}

struct Shared {
    name: &'static str,
    state: Mutex<LatchState>,
    opened: Condvar,
}

impl Shared {
    fn count_down(&self) {
        let mut state = self.state.lock();
        if state.remaining > 0 {
            state.remaining -= 1;
            if state.remaining == 0 {
                debug!("Latch `{}` opened", self.name);
                self.opened.notify_all();
            }
        }
    }

    fn interrupt(&self) {
        let mut state = self.state.lock();
        if state.remaining > 0 && !state.interrupted {
            debug!("Latch `{}` interrupted", self.name);
            state.interrupted = true;
            self.opened.notify_all();
        }
    }
}

/// Waiting side of the rendezvous. Cloning shares the same latch.
#[derive(Clone)]
pub struct Latch {
    shared: Arc<Shared>,
}

impl Latch {
    /// Creates a latch that opens after `count` signals.
    pub fn new(name: &'static str, count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(LatchState {
                    remaining: count,
                    interrupted: false,
                }),
                opened: Condvar::new(),
            }),
        }
    }

    /// Hands out a new signalling holder. Each holder counts down at most once.
    pub fn signaller(&self) -> Signal {
        Signal {
            shared: Arc::clone(&self.shared),
            fired: AtomicBool::new(false),
        }
    }

    /// Signals still missing before the latch opens.
    pub fn remaining(&self) -> usize {
        self.shared.state.lock().remaining
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    /// Blocks until the latch opens, it is interrupted, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// * `AnomalyError::Interrupted` - a holder was dropped without signalling,
    ///   or [Latch::interrupt] was called.
    /// * `AnomalyError::BarrierTimeout` - the latch stayed closed for `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.remaining == 0 {
                return Ok(());
            }
            if state.interrupted {
                return Err(AnomalyError::Interrupted {
                    barrier: self.shared.name,
                });
            }
            if self
                .shared
                .opened
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                // A signal may have landed together with the timeout.
                if state.remaining == 0 {
                    return Ok(());
                }
                if state.interrupted {
                    return Err(AnomalyError::Interrupted {
                        barrier: self.shared.name,
                    });
                }
                return Err(AnomalyError::BarrierTimeout {
                    barrier: self.shared.name,
                    waited: timeout,
                });
            }
        }
    }

    /// Wakes every waiter with `AnomalyError::Interrupted`. No-op once open.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }
}

/// Signalling side of the rendezvous.
pub struct Signal {
    shared: Arc<Shared>,
    fired: AtomicBool,
}

impl Signal {
    /// Counts the latch down. Only the first call per holder has an effect;
    /// returns whether this call was it.
    pub fn signal(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.count_down();
        true
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        if !self.fired.load(Ordering::Acquire) {
            self.shared.interrupt();
        }
    }
}
