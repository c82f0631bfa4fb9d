//! A cancellation primitive that can be tripped from one source, and a
//! context that combines several independent sources into one signal.
//!
//! The job-control plane combines cancellation from up to four parents
//! per task attempt: the caller's own signal, the shutdown signal, the
//! per-attempt deadline, and a registry-issued cancel (duplicate-policy
//! or explicit `cancel(request_id)`). Whichever trips first determines
//! the [`CancelReason`] the attempt observes.

use futures::future::{select_all, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Why a task or attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The end user or caller requested cancellation.
    User,
    /// The queue is shutting down.
    Shutdown,
    /// The per-attempt deadline expired.
    Timeout,
    /// A newer submission with the same request id superseded this one.
    DuplicatePolicy,
    /// The caller supplied an already-tripped signal at submission time.
    SignalAlreadyAborted,
}

impl CancelReason {
    /// Stable lowercase tag used in metric events (`reason` field).
    pub fn as_tag(&self) -> &'static str {
        match self {
            CancelReason::User => "user",
            CancelReason::Shutdown => "shutdown",
            CancelReason::Timeout => "timeout",
            CancelReason::DuplicatePolicy => "duplicate-policy",
            CancelReason::SignalAlreadyAborted => "signal-already-aborted",
        }
    }
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
}

/// A single, independently trippable cancellation source.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Trips the token. Returns `true` if this call was the one that
    /// actually set the reason (idempotent: later calls are no-ops).
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.inner.reason.lock().unwrap() = Some(reason);
        self.inner.notify.notify_waiters();
        true
    }

    /// True if the token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The reason the token was tripped, if it has been.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock().unwrap()
    }

    /// Resolves once the token has been tripped.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines several parent [`CancellationToken`]s plus a locally owned
/// one into a single cancellation signal. The first parent to trip
/// (or a direct `cancel` call) determines the reason observed by every
/// caller of [`CancellationContext::cancelled`].
#[derive(Clone)]
pub struct CancellationContext {
    own: CancellationToken,
    parents: Vec<CancellationToken>,
}

impl CancellationContext {
    /// Creates a context with no parents; only `cancel` can trip it.
    pub fn new() -> Self {
        Self {
            own: CancellationToken::new(),
            parents: Vec::new(),
        }
    }

    /// Creates a context combining the given parent signals.
    pub fn with_parents(parents: Vec<CancellationToken>) -> Self {
        Self {
            own: CancellationToken::new(),
            parents,
        }
    }

    /// Adds another parent signal to race against.
    pub fn add_parent(&mut self, parent: CancellationToken) {
        self.parents.push(parent);
    }

    /// Trips this context directly, independent of its parents.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.own.cancel(reason)
    }

    /// True if this context or any parent has already tripped.
    pub fn is_cancelled(&self) -> bool {
        self.own.is_cancelled() || self.parents.iter().any(|p| p.is_cancelled())
    }

    /// The reason this context is cancelled, computing it from whichever
    /// source already tripped (without waiting) if necessary.
    pub fn reason_if_cancelled(&self) -> Option<CancelReason> {
        if let Some(r) = self.own.reason() {
            return Some(r);
        }
        self.parents.iter().find_map(|p| p.reason())
    }

    /// Resolves with the reason of whichever source trips first.
    ///
    /// Once resolved, the winning reason is latched onto this context's
    /// own token, so subsequent calls return immediately.
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.reason_if_cancelled() {
            return reason;
        }

        if self.parents.is_empty() {
            self.own.cancelled().await;
            return self.own.reason().expect("token marked cancelled without a reason");
        }

        let own_index = self.parents.len();
        let mut futures: Vec<_> = self.parents.iter().map(|p| p.cancelled().boxed()).collect();
        futures.push(self.own.cancelled().boxed());

        let (_, index, _) = select_all(futures).await;
        let reason = if index == own_index {
            self.own.reason().expect("own token cancelled without reason")
        } else {
            self.parents[index]
                .reason()
                .expect("parent token cancelled without reason")
        };

        self.own.cancel(reason);
        reason
    }

    /// Races `future` against cancellation, returning the future's
    /// output if it wins, or the cancellation reason otherwise.
    pub async fn run_with<F, T>(&self, future: F) -> Result<T, CancelReason>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            output = future => Ok(output),
        }
    }
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}
