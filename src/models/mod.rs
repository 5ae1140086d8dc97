//! Data models for the bridge.
//!
//! - [`BridgeConfig`]: channel, timeout and download defaults loaded from `mediabridge.yaml`
//! - [`message`]: the wire envelope, the [`Action`] set and inbound classification into [`Inbound`]
//! - [`job`]: job identifiers, download requests, progress snapshots and connection test reports
//!
//! Inbound messages are classified once at the boundary ([`Inbound::classify`]) and routed by a
//! single `match` in the orchestrator; nothing downstream inspects raw field presence.

pub mod config;
pub mod job;
pub mod message;

pub use config::{BridgeConfig, BridgeSettings, DownloadDefaults};
pub use job::{DownloadRequest, JobId, ProgressSnapshot, TestReport};
pub use message::{Action, Inbound, JobEventKind};
