use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use wxbridge_core::ids::RequestId;
use wxbridge_core::BridgeError;

use crate::rpc::RpcResponse;

type Outcome = Result<Value, BridgeError>;

/// Pending bridge-initiated requests awaiting a gateway response.
///
/// Every registered id is resolved exactly once: by its response, by
/// timeout, or by [`Correlator::fail_all`] when the connection drops.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<RequestId, oneshot::Sender<Outcome>>,
}

/// Receiving half of a registered request.
pub struct PendingCall {
    pub id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and park a waiter for it.
    pub fn register(&self) -> PendingCall {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id.clone(), tx);
        PendingCall { id, rx }
    }

    /// Wait for the outcome of `call`, giving up after `timeout`.
    pub async fn wait(&self, call: PendingCall, timeout: Duration) -> Outcome {
        let PendingCall { id, rx } = call;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::ConnectionLost),
            Err(_) => {
                let _ = self.pending.remove(&id);
                tracing::warn!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    /// Drop a waiter without resolving it.
    pub fn cancel(&self, id: &RequestId) {
        let _ = self.pending.remove(id);
    }

    /// Route a response to its waiter. Returns false for unknown ids.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(key) = response.id.as_str() else {
            return false;
        };
        let Some((id, tx)) = self.pending.remove(&RequestId::from_raw(key)) else {
            tracing::debug!(request_id = key, "response for unknown request");
            return false;
        };

        let outcome = match (response.error, response.result) {
            (Some(err), _) => Err(BridgeError::Remote {
                code: err.code,
                message: err.message,
            }),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        };
        if tx.send(outcome).is_err() {
            tracing::debug!(request_id = %id, "waiter gone before response arrived");
        }
        true
    }

    /// Fail every pending waiter with [`BridgeError::ConnectionLost`].
    pub fn fail_all(&self) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(BridgeError::ConnectionLost));
                failed += 1;
            }
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
