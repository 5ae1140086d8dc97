// Call correlator - matches responses to pending one-shot calls
//
// Each pending call owns a oneshot sender. Resolution removes the entry, so a
// call resolves at most once and late duplicates find nothing to resolve.

use crate::error::BridgeError;
use crate::models::Action;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;

/// Process-wide correlation id counter. Ids start at 1 and are never reused.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome delivered to a waiting caller
pub type CallOutcome = Result<Value, BridgeError>;

/// One outstanding request/response exchange
#[derive(Debug)]
pub struct PendingCall {
    pub action: Action,
    pub created_at: Instant,
    resolver: oneshot::Sender<CallOutcome>,
}

/// Table of pending calls keyed by correlation id.
#[derive(Debug, Default)]
pub struct CallCorrelator {
    pending: HashMap<u64, PendingCall>,
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and record a pending call for it.
    ///
    /// Returns the id and the handle the caller waits on.
    pub fn register(&mut self, action: Action) -> (u64, oneshot::Receiver<CallOutcome>) {
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let (resolver, handle) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                action,
                created_at: Instant::now(),
                resolver,
            },
        );
        tracing::debug!("Registered call {} ({})", id, action);
        (id, handle)
    }

    /// Resolve the call with `id`. Returns false if no such call is pending.
    pub fn resolve(&mut self, id: u64, outcome: CallOutcome) -> bool {
        let Some(call) = self.pending.remove(&id) else {
            return false;
        };

        tracing::debug!(
            "Resolved call {} ({}) after {:?}: {}",
            id,
            call.action,
            call.created_at.elapsed(),
            if outcome.is_ok() { "ok" } else { "error" }
        );

        // The caller may have given up already
        let _ = call.resolver.send(outcome);
        true
    }

    /// Remove the call without resolving it (the caller stopped waiting).
    pub fn abandon(&mut self, id: u64) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Fail every pending call with `error`. Returns how many were failed.
    pub fn fail_all(&mut self, error: &BridgeError) -> usize {
        let count = self.pending.len();
        for (id, call) in self.pending.drain() {
            tracing::debug!("Failing call {} ({}): {}", id, call.action, error);
            let _ = call.resolver.send(Err(error.clone()));
        }
        count
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut correlator = CallCorrelator::new();
        let (a, _ha) = correlator.register(Action::Test);
        let (b, _hb) = correlator.register(Action::Test);
        let mut other = CallCorrelator::new();
        let (c, _hc) = other.register(Action::Cancel);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_resolves_exactly_once() {
        let mut correlator = CallCorrelator::new();
        let (id, mut handle) = correlator.register(Action::Test);

        assert!(correlator.resolve(id, Ok(json!({"first": true}))));
        assert!(!correlator.resolve(id, Ok(json!({"second": true}))));

        assert_eq!(handle.try_recv().unwrap(), Ok(json!({"first": true})));
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_resolve_after_caller_dropped() {
        let mut correlator = CallCorrelator::new();
        let (id, handle) = correlator.register(Action::Test);
        drop(handle);
        assert!(correlator.resolve(id, Ok(Value::Null)));
    }

    #[test]
    fn test_fail_all_empties_table() {
        let mut correlator = CallCorrelator::new();
        let (_, mut h1) = correlator.register(Action::Test);
        let (_, mut h2) = correlator.register(Action::SelectDirectory);

        let err = BridgeError::Connection("connection lost".into());
        assert_eq!(correlator.fail_all(&err), 2);
        assert!(correlator.is_empty());
        assert_eq!(h1.try_recv().unwrap(), Err(err.clone()));
        assert_eq!(h2.try_recv().unwrap(), Err(err));
    }

    #[test]
    fn test_abandon_removes_entry() {
        let mut correlator = CallCorrelator::new();
        let (id, _handle) = correlator.register(Action::OpenFolder);
        assert!(correlator.abandon(id).is_some());
        assert!(!correlator.is_pending(id));
        assert!(!correlator.resolve(id, Ok(Value::Null)));
    }

    proptest! {
        // Responses arriving in any order reach their own caller and nobody else's.
        #[test]
        fn prop_no_cross_talk(order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()) {
            let mut correlator = CallCorrelator::new();
            let calls: Vec<_> = (0..12).map(|_| correlator.register(Action::Test)).collect();

            for &index in &order {
                let id = calls[index].0;
                let resolved = correlator.resolve(id, Ok(json!({"echo": id})));
                prop_assert!(resolved);
            }

            for (id, mut handle) in calls {
                let value = handle.try_recv().unwrap().unwrap();
                prop_assert_eq!(value["echo"].as_u64(), Some(id));
            }
            prop_assert!(correlator.is_empty());
        }
    }
}
