//! Event log capability injected into every monitoring component.
//!
//! Components never reach for a global logger; they receive an
//! `Arc<dyn EventLog>` at construction. The production implementation writes
//! through `tracing` on two dedicated targets that the logging layer routes to
//! the event and debug log files.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Target used for event records.
pub const EVENT_TARGET: &str = "wafer_monitor::events";

/// Target used for debug records.
pub const DEBUG_TARGET: &str = "wafer_monitor::debug";

/// Target used for performance samples.
pub const PERFORMANCE_TARGET: &str = "wafer_monitor::performance";

/// Kinds of records written to the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLogKind {
    Created,
    Modified,
    Deleted,
    Moved,
    FileCreated,
    FileRenamed,
    FileComparison,
    PdfCreated,
    MonitoringStarted,
    MonitoringStopped,
}

impl EventLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
            Self::FileCreated => "File Created",
            Self::FileRenamed => "File Renamed",
            Self::FileComparison => "File Comparison and Replacement",
            Self::PdfCreated => "PDF Created",
            Self::MonitoringStarted => "Monitoring started",
            Self::MonitoringStopped => "Monitoring stopped",
        }
    }
}

impl fmt::Display for EventLogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget logging capability.
///
/// Implementations must not block meaningfully and must never panic or
/// return errors to the caller.
pub trait EventLog: Send + Sync {
    fn log_event(&self, kind: EventLogKind, src: &Path, dest: Option<&Path>);

    fn log_debug(&self, message: &str);

    /// One performance sample line, kept regardless of debug logging.
    fn log_performance(&self, line: &str);
}

/// `EventLog` backed by `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log_event(&self, kind: EventLogKind, src: &Path, dest: Option<&Path>) {
        match dest {
            Some(dest) => info!(
                target: EVENT_TARGET,
                "{} - {} -> {}",
                kind,
                src.display(),
                dest.display()
            ),
            None => info!(target: EVENT_TARGET, "{} - {}", kind, src.display()),
        }
    }

    fn log_debug(&self, message: &str) {
        debug!(target: DEBUG_TARGET, "{}", message);
    }

    fn log_performance(&self, line: &str) {
        info!(target: PERFORMANCE_TARGET, "{}", line);
    }
}

/// One captured event record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventLogKind,
    pub src: PathBuf,
    pub dest: Option<PathBuf>,
}

/// In-memory `EventLog` that keeps every record, for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingEventLog {
    events: Mutex<Vec<EventRecord>>,
    debug: Mutex<Vec<String>>,
    performance: Mutex<Vec<String>>,
}

impl RecordingEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, kind: EventLogKind) -> Vec<EventRecord> {
        self.events
            .lock()
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    pub fn debug_messages(&self) -> Vec<String> {
        self.debug.lock().clone()
    }

    pub fn performance_lines(&self) -> Vec<String> {
        self.performance.lock().clone()
    }

    /// True if any debug message contains `needle`.
    pub fn has_debug(&self, needle: &str) -> bool {
        self.debug.lock().iter().any(|m| m.contains(needle))
    }
}

impl EventLog for RecordingEventLog {
    fn log_event(&self, kind: EventLogKind, src: &Path, dest: Option<&Path>) {
        self.events.lock().push(EventRecord {
            kind,
            src: src.to_path_buf(),
            dest: dest.map(Path::to_path_buf),
        });
    }

    fn log_debug(&self, message: &str) {
        self.debug.lock().push(message.to_string());
    }

    fn log_performance(&self, line: &str) {
        self.performance.lock().push(line.to_string());
    }
}
