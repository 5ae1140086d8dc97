//! In-process worker connections.
//!
//! [`MemoryConnector`] hands each new connection's worker side to a
//! [`MemoryWorkers`] queue, where a test (or an embedding application) can
//! play the worker: read requests, send responses and job events, or drop the
//! connection.

use crate::error::BridgeError;
use crate::services::transport::{Connection, Connector, Endpoint};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Connector whose workers live in the current process.
pub struct MemoryConnector {
    workers: mpsc::UnboundedSender<MemoryWorker>,
    refusal: Mutex<Option<String>>,
}

/// Queue of worker sides, one per successful connect.
pub struct MemoryWorkers {
    rx: mpsc::UnboundedReceiver<MemoryWorker>,
}

/// The worker side of one in-process connection.
pub struct MemoryWorker {
    host_name: String,
    endpoint: Endpoint,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryWorkers) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                workers: tx,
                refusal: Mutex::new(None),
            },
            MemoryWorkers { rx },
        )
    }

    /// Make subsequent connects fail with `reason` until [`accept_connections`](Self::accept_connections).
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        *self.refusal.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    pub fn accept_connections(&self) {
        *self.refusal.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, host_name: &str) -> Result<Connection, BridgeError> {
        if let Some(reason) = self
            .refusal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(BridgeError::Connection(reason));
        }

        let (connection, endpoint) = Connection::pair();
        self.workers
            .send(MemoryWorker {
                host_name: host_name.to_string(),
                endpoint,
            })
            .map_err(|_| BridgeError::Connection("No in-process worker is listening".to_string()))?;

        Ok(connection)
    }
}

impl MemoryWorkers {
    /// Wait for the next connection's worker side.
    pub async fn next(&mut self) -> Option<MemoryWorker> {
        self.rx.recv().await
    }

    /// Take a worker side if a connection was already made.
    pub fn try_next(&mut self) -> Option<MemoryWorker> {
        self.rx.try_recv().ok()
    }
}

impl MemoryWorker {
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Next message sent by the orchestrator, or `None` once it dropped the connection.
    pub async fn recv(&mut self) -> Option<Value> {
        self.endpoint.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.endpoint.outbound.try_recv().ok()
    }

    /// Send a message to the orchestrator. Returns false if it stopped listening.
    pub fn send(&self, message: Value) -> bool {
        self.endpoint.deliver(message)
    }

    /// Reply to a request, echoing its `id` into `response`.
    pub fn reply(&self, request: &Value, mut response: Value) -> bool {
        if let (Some(object), Some(id)) = (response.as_object_mut(), request.get("id")) {
            object.insert("id".to_string(), id.clone());
        }
        self.send(response)
    }

    /// Drop the connection, reporting `reason` to the orchestrator.
    pub fn disconnect(self, reason: Option<&str>) {
        self.endpoint.disconnect(reason.map(str::to_string));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::TransportEvent;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_hands_out_worker() {
        let (connector, mut workers) = MemoryConnector::new();
        let mut connection = connector.connect("com.example.worker").unwrap();
        let mut worker = workers.next().await.unwrap();
        assert_eq!(worker.host_name(), "com.example.worker");

        connection.sender.send(json!({"id": 1, "action": "test"})).unwrap();
        let request = worker.recv().await.unwrap();
        assert!(worker.reply(&request, json!({"success": true})));

        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Message(json!({"success": true, "id": 1})))
        );
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let (connector, mut workers) = MemoryConnector::new();
        connector.refuse_connections("worker not installed");

        let err = connector.connect("com.example.worker").err().unwrap();
        assert_eq!(err, BridgeError::Connection("worker not installed".into()));
        assert!(workers.try_next().is_none());

        connector.accept_connections();
        assert!(connector.connect("com.example.worker").is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_reports_reason() {
        let (connector, mut workers) = MemoryConnector::new();
        let mut connection = connector.connect("w").unwrap();
        workers.next().await.unwrap().disconnect(Some("crashed"));

        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Disconnected(Some("crashed".to_string())))
        );
    }
}
