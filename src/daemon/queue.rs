//! Work items and the queue between watcher threads and the event processor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::daemon::event_log::EventLogKind;
use crate::daemon::image_batch::ImageBatchSettings;
use crate::error::{MonitorError, MonitorResult};

/// File-system event kinds that survive translation from raw notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl FsEventKind {
    pub fn log_kind(&self) -> EventLogKind {
        match self {
            Self::Created => EventLogKind::Created,
            Self::Modified => EventLogKind::Modified,
            Self::Deleted => EventLogKind::Deleted,
            Self::Moved => EventLogKind::Moved,
        }
    }
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_kind().as_str())
    }
}

/// Unit of work handed from a watcher to the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Target-folder event carrying a single path
    Routed { kind: FsEventKind, src: PathBuf },
    /// Target-folder rename carrying both ends
    RoutedWithDest { kind: FsEventKind, src: PathBuf, dest: PathBuf },
    /// File landed in the base-date folder
    BaseDateTrigger { src: PathBuf, image: ImageBatchSettings },
    /// Marker appeared in the derived-info folder
    DerivedInfoTrigger { src: PathBuf, image: ImageBatchSettings },
}

impl WorkItem {
    pub fn src(&self) -> &Path {
        match self {
            Self::Routed { src, .. }
            | Self::RoutedWithDest { src, .. }
            | Self::BaseDateTrigger { src, .. }
            | Self::DerivedInfoTrigger { src, .. } => src,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Routed { .. } => "routed",
            Self::RoutedWithDest { .. } => "routed_with_dest",
            Self::BaseDateTrigger { .. } => "base_date_trigger",
            Self::DerivedInfoTrigger { .. } => "derived_info_trigger",
        }
    }
}

/// Producer side of the work queue. Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct WorkSender {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl WorkSender {
    /// Enqueue without blocking.
    pub fn push(&self, item: WorkItem) -> MonitorResult<()> {
        self.tx.send(item).map_err(|_| MonitorError::QueueClosed)
    }
}

/// Outcome of a bounded wait on the queue
#[derive(Debug, PartialEq)]
pub enum Received {
    Item(WorkItem),
    Timeout,
    Closed,
}

/// Consumer side of the work queue. There is exactly one.
#[derive(Debug)]
pub struct WorkReceiver {
    rx: mpsc::UnboundedReceiver<WorkItem>,
}

impl WorkReceiver {
    /// Wait up to `timeout` for the next item in FIFO order.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Received::Item(item),
            Ok(None) => Received::Closed,
            Err(_) => Received::Timeout,
        }
    }

    /// Take an item if one is ready.
    pub fn try_recv(&mut self) -> Option<WorkItem> {
        self.rx.try_recv().ok()
    }
}

/// Create an unbounded FIFO work queue
pub fn work_queue() -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkSender { tx }, WorkReceiver { rx })
}
