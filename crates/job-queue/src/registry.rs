//! C2: the task lifecycle registry, mapping `request_id -> live task
//! record`. Only tasks submitted with a `request_id` are tracked here;
//! anonymous submissions still carry their own cancellation token but
//! are not subject to the duplicate-`request_id` policy.

use resilience_core::{CancelReason, CancellationToken};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

/// A snapshot of one registered task, independent of its payload type.
#[derive(Clone)]
pub(crate) struct TaskRecord {
    pub(crate) cancel: CancellationToken,
    pub(crate) user_id: Option<String>,
    pub(crate) priority_normalized: i32,
    pub(crate) enqueued_at_monotonic: Instant,
    pub(crate) enqueued_at_epoch: SystemTime,
}

/// `request_id -> TaskRecord`, guarded by one lock so duplicate-policy
/// checks are atomic with registration (spec.md §9's closing design
/// note).
pub(crate) struct TaskRegistry {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn has(&self, request_id: &str) -> bool {
        self.records.lock().unwrap().contains_key(request_id)
    }

    pub(crate) fn get(&self, request_id: &str) -> Option<TaskRecord> {
        self.records.lock().unwrap().get(request_id).cloned()
    }

    pub(crate) fn register(&self, request_id: String, record: TaskRecord) {
        self.records.lock().unwrap().insert(request_id, record);
    }

    /// Trips the registered task's cancellation token. Returns `false`
    /// if no task is registered under this id (already completed, or
    /// never existed).
    pub(crate) fn cancel(&self, request_id: &str, reason: CancelReason) -> bool {
        match self.records.lock().unwrap().get(request_id) {
            Some(record) => record.cancel.cancel(reason),
            None => false,
        }
    }

    pub(crate) fn release(&self, request_id: &str) {
        self.records.lock().unwrap().remove(request_id);
    }

    pub(crate) fn clear_all(&self) -> Vec<TaskRecord> {
        self.records.lock().unwrap().drain().map(|(_, r)| r).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord {
            cancel: CancellationToken::new(),
            user_id: Some("u1".to_string()),
            priority_normalized: 5,
            enqueued_at_monotonic: Instant::now(),
            enqueued_at_epoch: SystemTime::now(),
        }
    }

    #[test]
    fn register_then_cancel_trips_the_tokens_reason() {
        let registry = TaskRegistry::new();
        let rec = record();
        let token = rec.cancel.clone();
        registry.register("r1".to_string(), rec);

        assert!(registry.cancel("r1", CancelReason::User));
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::User));
    }

    #[test]
    fn cancelling_an_unknown_id_returns_false() {
        let registry = TaskRegistry::new();
        assert!(!registry.cancel("missing", CancelReason::User));
    }

    #[test]
    fn release_removes_the_record() {
        let registry = TaskRegistry::new();
        registry.register("r1".to_string(), record());
        assert!(registry.has("r1"));
        registry.release("r1");
        assert!(!registry.has("r1"));
    }

    #[test]
    fn clear_all_drains_every_record() {
        let registry = TaskRegistry::new();
        registry.register("r1".to_string(), record());
        registry.register("r2".to_string(), record());
        let cleared = registry.clear_all();
        assert_eq!(cleared.len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
