//! Wafer Monitor Library
//!
//! Folder monitoring agent: watches target, base-date and derived-info
//! folders, debounces their events, and runs regex-routed copies, timestamp
//! marker derivation, placeholder renames and image-batch PDF rendering.

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{FolderSetting, MonitorConfig, RoutingRule};
pub use daemon::event_log::{EventLog, EventLogKind, RecordingEventLog, TracingEventLog};
pub use daemon::MonitorSession;
pub use error::{MonitorError, MonitorResult};
