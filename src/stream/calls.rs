//! Method-call correlation.
//!
//! Each outgoing method call gets a fresh decimal id from a per-connection
//! counter and a one-shot reply slot. The slot is removed when the matching
//! `result` arrives, so an id can resolve at most once; results for unknown
//! ids are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome of a single method call.
pub type CallResult = Result<Value, CallError>;

/// Reply slot for a pending call.
pub type CallReply = oneshot::Sender<CallResult>;

/// Failure of a method call.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CallError {
    /// Server answered with an error payload, passed through unmodified.
    #[error("method error: {0}")]
    Method(Value),

    /// Connection closed before the call was answered.
    #[error("connection closed before the call completed")]
    ConnectionClosed,
}

/// Handle to a call's eventual result.
///
/// Available as soon as the call is issued, whether or not the request has
/// reached the server yet.
#[derive(Debug)]
pub struct CallHandle {
    rx: oneshot::Receiver<CallResult>,
}

impl CallHandle {
    /// Creates a linked reply slot and handle.
    pub fn channel() -> (CallReply, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for CallHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::ConnectionClosed)))
    }
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    issued_at: Instant,
    reply: CallReply,
}

#[derive(Debug)]
pub struct CallRegistry {
    next_id: u64,
    pending: HashMap<String, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates the next call id. Ids start at `"1"` and never repeat.
    pub fn next_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    pub fn register(&mut self, id: String, method: &str, reply: CallReply) {
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                issued_at: Instant::now(),
                reply,
            },
        );
    }

    /// Delivers the outcome for `id`. Returns `false` for an unknown or
    /// already resolved id.
    pub fn resolve(&mut self, id: &str, outcome: CallResult) -> bool {
        let Some(call) = self.pending.remove(id) else {
            debug!(event = "call_result_unmatched", id);
            return false;
        };

        debug!(
            event = "call_resolved",
            id,
            method = %call.method,
            ok = outcome.is_ok(),
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64
        );
        let _ = call.reply.send(outcome);
        true
    }

    /// Rejects every outstanding call with [`CallError::ConnectionClosed`].
    pub fn reject_all(&mut self) {
        for (id, call) in self.pending.drain() {
            debug!(event = "call_rejected_on_close", id = %id, method = %call.method);
            let _ = call.reply.send(Err(CallError::ConnectionClosed));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CallError, CallHandle, CallRegistry};

    #[test]
    fn ids_are_sequential_decimal_strings() {
        let mut registry = CallRegistry::new();
        assert_eq!(registry.next_id(), "1");
        assert_eq!(registry.next_id(), "2");
        assert_eq!(registry.next_id(), "3");
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let mut registry = CallRegistry::new();
        let (reply, handle) = CallHandle::channel();
        let id = registry.next_id();
        registry.register(id.clone(), "login", reply);

        assert!(registry.resolve(&id, Ok(json!({"token": "t"}))));
        assert!(!registry.resolve(&id, Err(CallError::Method(json!("late")))));
        assert!(registry.is_empty());
        assert_eq!(handle.await, Ok(json!({"token": "t"})));
    }

    #[test]
    fn unknown_id_is_a_no_op() {
        let mut registry = CallRegistry::new();
        assert!(!registry.resolve("99", Ok(json!(null))));
    }

    #[tokio::test]
    async fn reject_all_fails_pending_calls() {
        let mut registry = CallRegistry::new();
        let (reply, handle) = CallHandle::channel();
        let id = registry.next_id();
        registry.register(id, "slow", reply);

        registry.reject_all();

        assert!(registry.is_empty());
        assert_eq!(handle.await, Err(CallError::ConnectionClosed));
    }

    #[tokio::test]
    async fn dropped_reply_reads_as_closed() {
        let (reply, handle) = CallHandle::channel();
        drop(reply);
        assert_eq!(handle.await, Err(CallError::ConnectionClosed));
    }
}
