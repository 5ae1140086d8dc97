// Orchestrator - public facade over the worker channel
//
// Owns the channel, the pending-call table and the job table behind a single
// mutex that is never held across an await. One dispatch task per connection
// consumes transport events in order; notifications are queued under the same
// lock and delivered by a single consumer task, so observers see them in the
// order the tables changed.

use crate::error::BridgeError;
use crate::events::{EventSink, JobNotification};
use crate::metrics::Metrics;
use crate::models::message::{encode_request, payload_of};
use crate::models::{Action, BridgeConfig, DownloadRequest, Inbound, JobId, TestReport};
use crate::services::correlator::CallCorrelator;
use crate::services::registry::JobRegistry;
use crate::services::transport::{Connection, Connector, MessageSender, TransportEvent};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};

/// Reason attached to jobs failed by a disconnect
pub const CONNECTION_LOST: &str = "connection lost";

/// Bridge between the UI layer and the worker process.
///
/// Cheap to clone; clones share the same channel and tables.
///
/// # Example
/// ```ignore
/// let connector = Arc::new(NativeHostConnector::from_settings(&config.bridge));
/// let orchestrator = Orchestrator::new(config, connector, EventSink::new(), Handle::current());
///
/// let report = orchestrator.test_connection().await;
/// let job_id = orchestrator.start_job(DownloadRequest::new(url, title))?;
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    events: EventSink,
    metrics: Arc<Metrics>,
    runtime: Handle,
    notices: mpsc::UnboundedSender<JobNotification>,
    state: Mutex<BridgeState>,
}

struct LiveChannel {
    sender: MessageSender,
    generation: u64,
}

#[derive(Default)]
struct BridgeState {
    channel: Option<LiveChannel>,

    /// Incremented on every successful connect
    generation: u64,

    correlator: CallCorrelator,
    registry: JobRegistry,
}

impl BridgeState {
    fn live_generation(&self) -> Option<u64> {
        self.channel.as_ref().map(|c| c.generation)
    }
}

impl Orchestrator {
    /// Create an orchestrator. No connection is made until the first operation.
    ///
    /// Background tasks (notification delivery, per-connection dispatch) are
    /// spawned on `runtime`.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        events: EventSink,
        runtime: Handle,
    ) -> Self {
        let (notices, mut notice_rx) = mpsc::unbounded_channel::<JobNotification>();

        let sink = events.clone();
        runtime.spawn(async move {
            while let Some(notification) = notice_rx.recv().await {
                sink.notify(notification);
            }
            tracing::debug!("Notification queue closed");
        });

        tracing::info!(
            "Orchestrator ready for host {} (call timeout {:?})",
            config.bridge.host_name,
            config.bridge.call_timeout()
        );

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                events,
                metrics: Arc::new(Metrics::new()),
                runtime,
                notices,
                state: Mutex::new(BridgeState::default()),
            }),
        }
    }

    /// (Re)connect now. An existing connection is torn down first.
    ///
    /// Returns the new channel generation.
    pub fn connect(&self) -> Result<u64, BridgeError> {
        let mut state = self.inner.lock();
        self.inner.teardown_locked(&mut state, Some("reconnect requested"));
        self.inner.open_locked(&mut state)?;
        Ok(state.generation)
    }

    /// Drop the connection, failing everything outstanding.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        self.inner.teardown_locked(&mut state, Some("disconnect requested"));
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .channel
            .as_ref()
            .is_some_and(|c| !c.sender.is_closed())
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.inner.lock().registry.ids()
    }

    pub fn is_job_active(&self, job_id: &JobId) -> bool {
        self.inner.lock().registry.is_active(job_id)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.lock().correlator.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// One-shot call with the configured default timeout.
    pub async fn call(&self, action: Action, payload: Map<String, Value>) -> Result<Value, BridgeError> {
        let timeout = self.inner.config.bridge.call_timeout();
        self.call_with_timeout(action, payload, Some(timeout)).await
    }

    /// One-shot call. `None` waits until a response or a disconnect.
    pub async fn call_with_timeout(
        &self,
        action: Action,
        payload: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        self.send_call(action, payload, timeout, None).await
    }

    /// Start a download job and return its id immediately.
    ///
    /// Only a request without URL or title is rejected here. Every later
    /// failure, including an unreachable worker or a rejected request, is
    /// delivered as a `Failed` notification for the returned id.
    pub fn start_job(&self, request: DownloadRequest) -> Result<JobId, BridgeError> {
        request.validate().map_err(BridgeError::InvalidRequest)?;

        let request = self.inner.config.downloads.apply(request);
        let job_id = JobId::generate();

        {
            let mut state = self.inner.lock();
            state.registry.register(job_id.clone(), request.title.clone());
            self.inner.emit_locked(JobNotification::Started {
                job_id: job_id.clone(),
                label: request.title.clone(),
            });
        }

        tracing::info!("Starting job {} for {}", job_id, request.url);

        let mut payload = payload_of(&request);
        payload.insert("downloadId".to_string(), Value::from(job_id.as_str()));

        let this = self.clone();
        let id = job_id.clone();
        self.inner.runtime.spawn(async move {
            match this.send_call(Action::Download, payload, None, Some(&id)).await {
                Ok(_) => tracing::debug!("Worker acknowledged job {}", id),
                Err(e) => this.inner.fail_job(&id, e.to_string()),
            }
        });

        Ok(job_id)
    }

    /// Ask the worker to stop a job and retire it locally.
    ///
    /// The job is retired whatever the worker answers; a failed cancel call is
    /// only logged. Fails with `UnknownJob`, without touching the channel, if
    /// the job is not active.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<(), BridgeError> {
        if !self.inner.lock().registry.is_active(job_id) {
            return Err(BridgeError::UnknownJob(job_id.clone()));
        }

        let mut payload = Map::new();
        payload.insert("downloadId".to_string(), Value::from(job_id.as_str()));

        if let Err(e) = self.call(Action::Cancel, payload).await {
            tracing::warn!("Worker did not confirm cancellation of {}: {}", job_id, e);
        }

        let mut state = self.inner.lock();
        if let Some(entry) = state.registry.retire(job_id) {
            tracing::info!("Job {} cancelled", job_id);
            self.inner.emit_locked(JobNotification::Cancelled {
                job_id: job_id.clone(),
                label: entry.label,
            });
        }

        Ok(())
    }

    /// Check that the worker answers. Failures are reported in the result, never returned as errors.
    pub async fn test_connection(&self) -> TestReport {
        match self.call(Action::Test, Map::new()).await {
            Ok(response) => TestReport {
                ok: true,
                worker_version: string_field(&response, &["workerVersion", "ytdlpVersion"]),
                media_tool_version: string_field(&response, &["mediaToolVersion", "ffmpegVersion"]),
                error: None,
            },
            Err(e) => {
                tracing::warn!("Connection test failed: {}", e);
                TestReport::failed(e.to_string())
            }
        }
    }

    /// Ask the worker to show a directory picker.
    pub async fn select_output_location(&self) -> Result<Utf8PathBuf, BridgeError> {
        let timeout = self.inner.config.bridge.dialog_timeout();
        let response = self
            .call_with_timeout(Action::SelectDirectory, Map::new(), Some(timeout))
            .await?;

        string_field(&response, &["path"])
            .map(Utf8PathBuf::from)
            .ok_or_else(|| BridgeError::Remote("worker returned no path".to_string()))
    }

    /// Ask the worker to reveal `path` in the platform file manager.
    pub async fn open_location(&self, path: &Utf8Path) -> Result<(), BridgeError> {
        let mut payload = Map::new();
        payload.insert("path".to_string(), Value::from(path.as_str()));
        self.call(Action::OpenFolder, payload).await.map(|_| ())
    }

    /// Register, send and await one call.
    ///
    /// With `job` set, the request is only sent while that job is still
    /// active, so a job retired by a disconnect is never started on the next
    /// connection.
    async fn send_call(
        &self,
        action: Action,
        payload: Map<String, Value>,
        timeout: Option<Duration>,
        job: Option<&JobId>,
    ) -> Result<Value, BridgeError> {
        let metrics = &self.inner.metrics;

        let (id, mut handle) = {
            let mut state = self.inner.lock();

            if let Some(job_id) = job {
                if !state.registry.is_active(job_id) {
                    return Err(BridgeError::UnknownJob(job_id.clone()));
                }
            }

            let sender = self.inner.ensure_connected(&mut state)?;
            let (id, handle) = state.correlator.register(action);

            if let Err(e) = sender.send(encode_request(id, action, payload)) {
                state.correlator.abandon(id);
                self.inner.teardown_locked(&mut state, Some("channel closed"));
                metrics.record_call_failed();
                return Err(e);
            }

            metrics.record_call_sent();
            (id, handle)
        };

        let received = match timeout {
            None => (&mut handle).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    if self.inner.lock().correlator.abandon(id).is_some() {
                        tracing::warn!("Call {} ({}) timed out after {:?}", id, action, limit);
                        metrics.record_call_timed_out();
                        return Err(BridgeError::Timeout(limit));
                    }
                    // Resolved while the deadline fired
                    handle.try_recv().ok()
                }
            },
        };

        let outcome = received.unwrap_or_else(|| {
            Err(BridgeError::Connection("call was dropped".to_string()))
        });
        if outcome.is_err() {
            metrics.record_call_failed();
        }
        outcome
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a notification. Must be called with the state lock held.
    fn emit_locked(&self, notification: JobNotification) {
        self.metrics.record_notification(&notification);
        if self.notices.send(notification).is_err() {
            tracing::debug!("Notification queue closed, dropping notification");
        }
    }

    fn ensure_connected(self: &Arc<Self>, state: &mut BridgeState) -> Result<MessageSender, BridgeError> {
        match state.channel.as_ref().map(|c| c.sender.clone()) {
            Some(sender) if !sender.is_closed() => return Ok(sender),
            Some(_) => self.teardown_locked(state, Some("worker channel closed")),
            None => {}
        }
        self.open_locked(state)
    }

    fn open_locked(self: &Arc<Self>, state: &mut BridgeState) -> Result<MessageSender, BridgeError> {
        let host_name = &self.config.bridge.host_name;
        let _runtime = self.runtime.enter();

        let Connection { sender, events } = self.connector.connect(host_name).map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", host_name, e);
            self.metrics.record_connect_failed();
            e
        })?;

        state.generation += 1;
        let generation = state.generation;
        state.channel = Some(LiveChannel {
            sender: sender.clone(),
            generation,
        });

        self.runtime
            .spawn(dispatch_loop(Arc::downgrade(self), generation, events));
        self.metrics.record_connected();
        tracing::info!("Connected to {} (generation {})", host_name, generation);

        Ok(sender)
    }

    /// Drop the live channel and fail everything that depended on it.
    fn teardown_locked(&self, state: &mut BridgeState, reason: Option<&str>) {
        let Some(channel) = state.channel.take() else {
            return;
        };

        let message = match reason {
            Some(reason) => format!("{}: {}", CONNECTION_LOST, reason),
            None => CONNECTION_LOST.to_string(),
        };

        let calls = state
            .correlator
            .fail_all(&BridgeError::Connection(message.clone()));
        let failures = state.registry.fail_all(CONNECTION_LOST);

        tracing::info!(
            "Channel generation {} closed ({}): failed {} calls and {} jobs",
            channel.generation,
            message,
            calls,
            failures.len()
        );

        for notification in failures {
            self.emit_locked(notification);
        }
        self.metrics.record_disconnected();
    }

    fn handle_disconnect(&self, generation: u64, reason: Option<String>) {
        let mut state = self.lock();
        if state.live_generation() != Some(generation) {
            tracing::debug!("Ignoring disconnect of stale generation {}", generation);
            return;
        }
        tracing::warn!(
            "Worker disconnected: {}",
            reason.as_deref().unwrap_or("no reason given")
        );
        self.teardown_locked(&mut state, reason.as_deref());
    }

    fn dispatch(&self, generation: u64, message: Value) {
        let mut state = self.lock();
        if state.live_generation() != Some(generation) {
            tracing::debug!("Dropping message from stale generation {}", generation);
            return;
        }

        match Inbound::classify(message) {
            Inbound::CallResponse { id, outcome } => {
                if state.correlator.resolve(id, outcome.map_err(BridgeError::Remote)) {
                    self.metrics.record_call_resolved();
                } else {
                    tracing::debug!("No pending call {}, dropping response", id);
                    self.metrics.record_event_dropped();
                }
            }
            Inbound::JobEvent { job_id, event } => match state.registry.route(&job_id, event) {
                Some(notification) => self.emit_locked(notification),
                None => self.metrics.record_event_dropped(),
            },
            Inbound::Unrecognized(message) => {
                tracing::warn!("Unrecognized message from worker: {}", message);
                self.metrics.record_event_dropped();
            }
        }
    }

    /// Retire a job whose start request failed.
    fn fail_job(&self, job_id: &JobId, error: String) {
        let mut state = self.lock();
        if let Some(entry) = state.registry.retire(job_id) {
            tracing::warn!("Job {} failed to start: {}", job_id, error);
            self.emit_locked(JobNotification::Failed {
                job_id: job_id.clone(),
                label: entry.label,
                error,
            });
        }
    }
}

/// Consume one connection's transport events in order.
async fn dispatch_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(message) => inner.dispatch(generation, message),
            TransportEvent::Malformed(reason) => {
                tracing::warn!("Dropping malformed message from worker: {}", reason);
                inner.metrics.record_event_dropped();
            }
            TransportEvent::Disconnected(reason) => {
                inner.handle_disconnect(generation, reason);
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_disconnect(generation, None);
    }
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| value.get(*name).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::memory::MemoryConnector;
    use crate::services::transport::MockConnector;
    use serde_json::json;
    use std::task::Poll;

    fn orchestrator_with(connector: Arc<dyn Connector>) -> Orchestrator {
        Orchestrator::new(
            BridgeConfig::default(),
            connector,
            EventSink::new(),
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_launch_failure_surfaces_as_connection_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(BridgeError::Connection("host manifest missing".into())));
        let orchestrator = orchestrator_with(Arc::new(connector));

        let err = orchestrator.call(Action::Test, Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(orchestrator.pending_calls(), 0);
        assert_eq!(orchestrator.generation(), 0);
    }

    #[tokio::test]
    async fn test_connector_receives_configured_host_name() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .withf(|name: &str| name == "com.mediabridge.native_host")
            .returning(|_| Err(BridgeError::Connection("not installed".into())));
        let orchestrator = orchestrator_with(Arc::new(connector));

        let report = orchestrator.test_connection().await;
        assert!(!report.ok);
        assert!(report.error.unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn test_call_without_timeout_suspends_until_reply() {
        let (connector, mut workers) = MemoryConnector::new();
        let orchestrator = orchestrator_with(Arc::new(connector));

        let mut call = tokio_test::task::spawn(orchestrator.call_with_timeout(
            Action::SelectDirectory,
            Map::new(),
            None,
        ));
        tokio_test::assert_pending!(call.poll());

        let mut worker = workers.next().await.unwrap();
        let request = worker.recv().await.unwrap();
        assert_eq!(request["action"], "selectDirectory");
        assert_eq!(orchestrator.pending_calls(), 1);

        worker.reply(&request, json!({"success": true, "path": "/tmp"}));
        let value = loop {
            if let Poll::Ready(result) = call.poll() {
                break result.unwrap();
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(value["path"], "/tmp");
        assert_eq!(orchestrator.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let (connector, mut workers) = MemoryConnector::new();
        let orchestrator = orchestrator_with(Arc::new(connector));

        assert_eq!(orchestrator.connect().unwrap(), 1);
        let old = workers.next().await.unwrap();
        assert_eq!(orchestrator.connect().unwrap(), 2);
        let _current = workers.next().await.unwrap();

        old.disconnect(Some("late"));
        tokio::task::yield_now().await;

        assert!(orchestrator.is_connected());
        assert_eq!(orchestrator.generation(), 2);
    }
}
