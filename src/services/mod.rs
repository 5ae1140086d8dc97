//! Services module - the native bridge and download orchestrator.
//!
//! # Components
//!
//! - [`transport`]: the channel to the worker process. Frames messages as native-messaging
//!   length-prefixed JSON, launches the worker named by a host manifest ([`NativeHostConnector`]),
//!   and reports inbound messages and disconnects as [`TransportEvent`]s.
//! - [`manifest`]: lookup and validation of the worker's host registration.
//! - [`memory`]: an in-process worker side for tests and embedding.
//! - [`CallCorrelator`]: pending one-shot calls keyed by correlation id.
//! - [`JobRegistry`]: active download jobs keyed by job id.
//! - [`Orchestrator`]: the public facade composing all of the above.
//!
//! # Flow
//!
//! A caller issues a call or starts a job; the orchestrator connects lazily if needed, records
//! the pending operation, and writes the request. Inbound messages are classified once into call
//! responses or job events and routed to the correlator or the registry. Job notifications go
//! out through the [`EventSink`](crate::events::EventSink).
//!
//! There is no background reconnect loop. A disconnect fails whatever was outstanding and the
//! next operation opens a fresh connection.

pub mod correlator;
pub mod manifest;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod transport;

pub use correlator::CallCorrelator;
pub use manifest::HostManifest;
pub use memory::{MemoryConnector, MemoryWorker, MemoryWorkers};
pub use orchestrator::{CONNECTION_LOST, Orchestrator};
pub use registry::{JobEntry, JobPhase, JobRegistry};
pub use transport::{
    Connection, Connector, Endpoint, FrameError, MessageSender, NativeHostConnector,
    TransportEvent,
};
