//! Completion signal between a waiting caller and the attempt it waits on
//!
//! Every authentication attempt gets a generation number when it starts. The
//! flow that runs it holds a `GateRelease` for that generation, and only that
//! guard can end the attempt. Waiters get a fresh oneshot channel each time
//! they arm, so a stale completion can never wake a later, unrelated attempt.
//!
//! An attempt stays live until its guard drops, even if its waiter went away
//! (cancelled future, `unlock()`). Arming while an attempt is live joins it
//! instead of starting a second one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// How an authentication attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The store now holds a fresh access token.
    Succeeded,
    /// The token exchange failed.
    Failed,
    /// The user or the consent UI gave up before a code was obtained.
    Abandoned,
}

/// Result of arming the gate.
#[derive(Debug)]
pub(crate) enum Armed {
    /// No attempt was live; the caller must start one for `generation`.
    Fresh {
        waiter: oneshot::Receiver<AttemptOutcome>,
        generation: u64,
    },
    /// An earlier attempt is still running; wait for it instead of starting
    /// another.
    Joined(oneshot::Receiver<AttemptOutcome>),
}

#[derive(Debug, Default)]
struct Slot {
    /// Generation of the most recently started attempt.
    generation: u64,
    /// Whether that attempt's guard is still alive.
    live: bool,
    waiter: Option<oneshot::Sender<AttemptOutcome>>,
}

#[derive(Debug, Default)]
pub(crate) struct Gate {
    slot: Mutex<Slot>,
}

impl Gate {
    pub fn arm(&self) -> Armed {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.lock();
        slot.waiter = Some(tx);
        if slot.live {
            return Armed::Joined(rx);
        }
        slot.generation += 1;
        slot.live = true;
        Armed::Fresh {
            waiter: rx,
            generation: slot.generation,
        }
    }

    /// Wake the current waiter, if any, leaving the attempt live. Returns
    /// whether a waiter was armed.
    pub fn release_waiter(&self, outcome: AttemptOutcome) -> bool {
        match self.lock().waiter.take() {
            Some(tx) => {
                // The waiter may have been cancelled; nothing to do then.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// End attempt `generation` and wake whoever waits on it. A no-op for an
    /// attempt that already ended or was superseded.
    pub fn finish(&self, generation: u64, outcome: AttemptOutcome) -> bool {
        let mut slot = self.lock();
        if !slot.live || slot.generation != generation {
            return false;
        }
        slot.live = false;
        if let Some(tx) = slot.waiter.take() {
            let _ = tx.send(outcome);
        }
        true
    }

    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.lock().live
    }

    #[cfg(test)]
    pub fn has_waiter(&self) -> bool {
        self.lock().waiter.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends one attempt when dropped, so every exit path of a flow (including a
/// panic or a dropped task) wakes the waiting caller.
#[derive(Debug)]
pub(crate) struct GateRelease {
    gate: Arc<Gate>,
    generation: u64,
    outcome: AttemptOutcome,
}

impl GateRelease {
    pub fn new(gate: Arc<Gate>, generation: u64, outcome: AttemptOutcome) -> Self {
        Self {
            gate,
            generation,
            outcome,
        }
    }

    /// Outcome reported when this guard is dropped.
    pub fn set_outcome(&mut self, outcome: AttemptOutcome) {
        self.outcome = outcome;
    }
}

impl Drop for GateRelease {
    fn drop(&mut self) {
        self.gate.finish(self.generation, self.outcome);
    }
}
