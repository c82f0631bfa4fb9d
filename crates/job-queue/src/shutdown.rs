//! C9: the idempotent "run exactly once, let concurrent callers await
//! the same completion" primitive `graceful_shutdown` is built on, per
//! spec.md §4.9 step 1 ("concurrent calls share one in-flight promise").
//!
//! Grounded on the teacher's single in-flight half-open trial guard
//! (`circuit-breaker/src/circuit.rs`'s `half_open_in_flight` bool),
//! generalized from a boolean gate to a broadcast-once future so late
//! arrivals can await the result instead of being turned away.

use std::sync::Mutex;
use tokio::sync::broadcast;

enum State {
    Idle,
    InFlight(broadcast::Sender<()>),
    Done,
}

/// Runs an async closure exactly once across however many callers race
/// to invoke it; every caller (the first and every later one) returns
/// only after the sequence has completed.
pub(crate) struct RunOnce {
    state: Mutex<State>,
}

impl RunOnce {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// Resets to `Idle` so a future call to `run` executes the sequence
    /// again. Used by `resume_accepting` after a completed shutdown
    /// (spec.md §4.9 step 8 / "restartable").
    pub(crate) fn reset(&self) {
        *self.state.lock().unwrap() = State::Idle;
    }

    pub(crate) async fn run<F, Fut>(&self, run_sequence: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                State::Done => return,
                State::InFlight(tx) => Some(tx.subscribe()),
                State::Idle => {
                    let (tx, _rx) = broadcast::channel(1);
                    *state = State::InFlight(tx);
                    None
                }
            }
        };

        match waiter {
            Some(mut rx) => {
                let _ = rx.recv().await;
            }
            None => {
                run_sequence().await;
                let mut state = self.state.lock().unwrap();
                if let State::InFlight(tx) = &*state {
                    let _ = tx.send(());
                }
                *state = State::Done;
            }
        }
    }
}
