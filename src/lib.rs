// mediabridge - Native messaging bridge and download orchestrator
//
// This is the library crate containing the channel, call correlation, job tracking and
// event delivery. The binary crate (main.rs) provides a command-line front end.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{BridgeError, ErrorKind};
pub use events::{EventSink, JobNotification, NotificationKind, Observer};
pub use models::{BridgeConfig, DownloadRequest, JobId, ProgressSnapshot, TestReport};
pub use services::{NativeHostConnector, Orchestrator};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
