//! Folder watchers: notify subscriptions that classify, filter, debounce and
//! enqueue file events.
//!
//! One `FolderWatcher` covers every root of one role. Its notify callbacks run
//! on notify's own thread and do nothing slow, with one exception: a marker
//! created in the derived-info folder triggers the compare-folder rename right
//! away, ahead of the compare folder's own watcher. A ticker thread per root
//! expires rename sources that never see their destination half.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::daemon::debounce::{EventDeduplicator, EventKey};
use crate::daemon::event_log::EventLog;
use crate::daemon::image_batch::ImageBatchSettings;
use crate::daemon::paths;
use crate::daemon::queue::{FsEventKind, WorkItem, WorkSender};
use crate::daemon::rename;
use crate::error::{MonitorError, MonitorResult};

/// How long a rename source waits for its destination half.
const RENAME_PAIRING_WINDOW: Duration = Duration::from_millis(500);

/// How often unpaired rename halves are checked for expiry between events.
const RENAME_EXPIRY_TICK: Duration = Duration::from_millis(100);

/// Role of a watched root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchRole {
    Target,
    BaseDate,
    DerivedInfo,
}

impl fmt::Display for WatchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Target => "target",
            Self::BaseDate => "base_date",
            Self::DerivedInfo => "derived_info",
        };
        f.write_str(name)
    }
}

/// File event after translation from notify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub dest: Option<PathBuf>,
    pub is_dir: bool,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into(), dest: None, is_dir: false }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Deleted, path)
    }

    pub fn moved(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Moved,
            path: src.into(),
            dest: Some(dest.into()),
            is_dir: false,
        }
    }

    pub fn directory(mut self) -> Self {
        self.is_dir = true;
        self
    }
}

#[derive(Debug)]
struct PendingRename {
    path: PathBuf,
    is_dir: bool,
    seen_at: Instant,
}

/// Turns raw notify events into `FsEvent`s, pairing split renames.
///
/// Backends report a rename as a `From` half, a `To` half and sometimes a
/// combined `Both` event sharing one tracker. Halves are paired by tracker into
/// a single move; a `From` left unpaired past the pairing window becomes a
/// delete, and a `To` with no `From` becomes a create.
#[derive(Debug, Default)]
pub struct EventTranslator {
    pending_from: HashMap<usize, PendingRename>,
    paired: HashMap<usize, Instant>,
}

impl EventTranslator {
    pub fn translate(&mut self, event: &Event) -> Vec<FsEvent> {
        self.translate_at(event, Instant::now())
    }

    pub fn translate_at(&mut self, event: &Event, now: Instant) -> Vec<FsEvent> {
        let mut out = self.expire_pending(now);
        let tracker = event.attrs.tracker();

        match &event.kind {
            EventKind::Create(kind) => {
                let folder = matches!(kind, CreateKind::Folder);
                for path in &event.paths {
                    out.push(with_dir(FsEvent::created(path), folder || path.is_dir()));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.translate_rename(*mode, tracker, &event.paths, now, &mut out);
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    out.push(with_dir(FsEvent::modified(path), path.is_dir()));
                }
            }
            EventKind::Remove(kind) => {
                let folder = matches!(kind, RemoveKind::Folder);
                for path in &event.paths {
                    out.push(with_dir(FsEvent::deleted(path), folder));
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        out
    }

    fn translate_rename(
        &mut self,
        mode: RenameMode,
        tracker: Option<usize>,
        event_paths: &[PathBuf],
        now: Instant,
        out: &mut Vec<FsEvent>,
    ) {
        match mode {
            RenameMode::Both => {
                if let Some(t) = tracker {
                    self.pending_from.remove(&t);
                    if self.paired.remove(&t).is_some() {
                        return;
                    }
                }
                if let [from, to, ..] = event_paths {
                    out.push(with_dir(FsEvent::moved(from, to), to.is_dir()));
                }
            }
            RenameMode::From => {
                for path in event_paths {
                    match tracker {
                        Some(t) => {
                            self.pending_from.insert(
                                t,
                                PendingRename { path: path.clone(), is_dir: path.is_dir(), seen_at: now },
                            );
                        }
                        None => out.push(FsEvent::deleted(path)),
                    }
                }
            }
            RenameMode::To => {
                for path in event_paths {
                    let pending = tracker.and_then(|t| self.pending_from.remove(&t));
                    match (pending, tracker) {
                        (Some(from), Some(t)) => {
                            self.paired.insert(t, now);
                            out.push(with_dir(FsEvent::moved(from.path, path), path.is_dir()));
                        }
                        _ => out.push(with_dir(FsEvent::created(path), path.is_dir())),
                    }
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in event_paths {
                    if path.exists() {
                        out.push(with_dir(FsEvent::created(path), path.is_dir()));
                    } else {
                        out.push(FsEvent::deleted(path));
                    }
                }
            }
        }
    }

    /// Turn rename sources left unpaired past the pairing window into deletes.
    ///
    /// Called on every event and from the watcher's expiry ticker, so a file
    /// moved out of a watched tree is reported even when nothing else happens.
    pub fn expire_pending(&mut self, now: Instant) -> Vec<FsEvent> {
        self.paired
            .retain(|_, at| now.saturating_duration_since(*at) <= RENAME_PAIRING_WINDOW);

        let expired: Vec<usize> = self
            .pending_from
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.seen_at) > RENAME_PAIRING_WINDOW)
            .map(|(t, _)| *t)
            .collect();

        expired
            .into_iter()
            .filter_map(|t| self.pending_from.remove(&t))
            .map(|p| with_dir(FsEvent::deleted(p.path), p.is_dir))
            .collect()
    }
}

fn with_dir(event: FsEvent, is_dir: bool) -> FsEvent {
    if is_dir {
        event.directory()
    } else {
        event
    }
}

/// Per-role event policy shared by all notify callbacks of that role.
pub struct FolderHandler {
    role: WatchRole,
    exclusions: Vec<PathBuf>,
    dedup: Arc<EventDeduplicator>,
    queue: WorkSender,
    image: ImageBatchSettings,
    compare_folders: Vec<PathBuf>,
    log: Arc<dyn EventLog>,
}

impl FolderHandler {
    /// Handler for plain target folders, with an exclusion set.
    pub fn target(
        dedup: Arc<EventDeduplicator>,
        queue: WorkSender,
        exclusions: &[PathBuf],
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            role: WatchRole::Target,
            exclusions: exclusions.iter().map(|p| paths::normalize(p)).collect(),
            dedup,
            queue,
            image: ImageBatchSettings::default(),
            compare_folders: Vec::new(),
            log,
        }
    }

    /// Handler for the base-date folder.
    pub fn base_date(
        dedup: Arc<EventDeduplicator>,
        queue: WorkSender,
        image: ImageBatchSettings,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            role: WatchRole::BaseDate,
            exclusions: Vec::new(),
            dedup,
            queue,
            image,
            compare_folders: Vec::new(),
            log,
        }
    }

    /// Handler for the derived-info (`wf_info`) folder.
    pub fn derived_info(
        dedup: Arc<EventDeduplicator>,
        queue: WorkSender,
        image: ImageBatchSettings,
        compare_folders: &[PathBuf],
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            role: WatchRole::DerivedInfo,
            exclusions: Vec::new(),
            dedup,
            queue,
            image,
            compare_folders: compare_folders.to_vec(),
            log,
        }
    }

    pub fn role(&self) -> WatchRole {
        self.role
    }

    pub fn handle(&self, event: FsEvent) -> Option<WorkItem> {
        self.handle_at(event, Instant::now())
    }

    /// Apply the role policy to one event and enqueue the resulting item.
    ///
    /// Returns the enqueued item, or `None` if the event was dropped.
    pub fn handle_at(&self, event: FsEvent, now: Instant) -> Option<WorkItem> {
        if event.is_dir {
            return None;
        }

        let path = paths::normalize(&event.path);
        let dest = event.dest.as_deref().map(paths::normalize);

        if self.is_excluded(&path) {
            return None;
        }

        if event.kind == FsEventKind::Modified && self.dedup.is_creation_shadowed_at(&path, now) {
            self.log.log_debug(&format!(
                "[{}] modified shadowed by recent create: {}",
                self.role,
                path.display()
            ));
            return None;
        }

        let key = EventKey { kind: event.kind, path: path.clone(), dest: dest.clone() };
        if !self.dedup.should_process_at(&key, now) {
            self.log.log_debug(&format!(
                "[{}] duplicate {} ignored: {}",
                self.role,
                event.kind,
                path.display()
            ));
            return None;
        }
        if event.kind == FsEventKind::Created {
            self.dedup.record_created_at(&path, now);
        }

        let item = self.work_item(event.kind, path, dest)?;
        self.enqueue(item)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.role == WatchRole::Target && self.exclusions.iter().any(|prefix| paths::is_under(path, prefix))
    }

    fn work_item(&self, kind: FsEventKind, path: PathBuf, dest: Option<PathBuf>) -> Option<WorkItem> {
        match (self.role, kind) {
            (WatchRole::BaseDate, FsEventKind::Created | FsEventKind::Modified) => {
                Some(WorkItem::BaseDateTrigger { src: path, image: self.image.clone() })
            }
            (WatchRole::BaseDate, _) => {
                self.log.log_debug(&format!("[{}] {} not handled: {}", self.role, kind, path.display()));
                None
            }
            (WatchRole::DerivedInfo, FsEventKind::Created) => {
                rename::rename_in_compare_folders(&path, &self.compare_folders, self.log.as_ref());
                Some(WorkItem::DerivedInfoTrigger { src: path, image: self.image.clone() })
            }
            (_, FsEventKind::Moved) => match dest {
                Some(dest) => Some(WorkItem::RoutedWithDest { kind, src: path, dest }),
                None => Some(WorkItem::Routed { kind, src: path }),
            },
            (_, _) => Some(WorkItem::Routed { kind, src: path }),
        }
    }

    fn enqueue(&self, item: WorkItem) -> Option<WorkItem> {
        match self.queue.push(item.clone()) {
            Ok(()) => {
                self.log.log_debug(&format!(
                    "[{}] queued {}: {}",
                    self.role,
                    item.label(),
                    item.src().display()
                ));
                Some(item)
            }
            Err(e) => {
                self.log.log_debug(&format!("[{}] {}: {}", self.role, e, item.src().display()));
                None
            }
        }
    }
}

/// One watched root: the notify subscription plus its rename expiry ticker
struct Subscription {
    root: PathBuf,
    watcher: RecommendedWatcher,
    ticker_stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

/// Notify subscriptions for every root of one role
pub struct FolderWatcher {
    role: WatchRole,
    subscriptions: Vec<Subscription>,
}

impl FolderWatcher {
    /// Subscribe recursively to each root.
    ///
    /// Fails with `WatchRootMissing` if a root is not an existing directory
    /// and with `WatchFailed` if the subscription is refused. Failures that
    /// happen later are sent on `failures`.
    pub fn start(
        handler: Arc<FolderHandler>,
        roots: &[PathBuf],
        failures: mpsc::UnboundedSender<MonitorError>,
    ) -> MonitorResult<Self> {
        let role = handler.role();
        let mut watcher = Self { role, subscriptions: Vec::with_capacity(roots.len()) };

        for root in roots {
            let root = paths::normalize(root);
            if !root.is_dir() {
                return Err(MonitorError::WatchRootMissing { path: root });
            }
            let subscription = Self::subscribe(handler.clone(), &root, failures.clone())?;
            info!("Watching {} folder {}", role, root.display());
            watcher.subscriptions.push(subscription);
        }

        Ok(watcher)
    }

    fn subscribe(
        handler: Arc<FolderHandler>,
        root: &Path,
        failures: mpsc::UnboundedSender<MonitorError>,
    ) -> MonitorResult<Subscription> {
        let callback_root = root.to_path_buf();
        let translator = Arc::new(Mutex::new(EventTranslator::default()));
        let callback_translator = translator.clone();
        let callback_handler = handler.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Remove(_)) && !callback_root.exists() {
                        let _ = failures.send(MonitorError::WatchRootMissing { path: callback_root.clone() });
                        return;
                    }
                    let now = Instant::now();
                    let events = callback_translator.lock().translate_at(&event, now);
                    for fs_event in events {
                        callback_handler.handle_at(fs_event, now);
                    }
                }
                Err(e) => {
                    if callback_root.exists() {
                        warn!("Watch error under {}: {}", callback_root.display(), e);
                    } else {
                        let _ = failures.send(MonitorError::WatchFailed {
                            root: callback_root.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| MonitorError::WatchFailed { root: root.to_path_buf(), message: e.to_string() })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| MonitorError::WatchFailed { root: root.to_path_buf(), message: e.to_string() })?;

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker = Self::spawn_expiry_ticker(handler, translator, ticker_stop.clone(), root)?;

        Ok(Subscription {
            root: root.to_path_buf(),
            watcher,
            ticker_stop,
            ticker: Some(ticker),
        })
    }

    fn spawn_expiry_ticker(
        handler: Arc<FolderHandler>,
        translator: Arc<Mutex<EventTranslator>>,
        stop: Arc<AtomicBool>,
        root: &Path,
    ) -> MonitorResult<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("rename-expiry-{}", handler.role()))
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    std::thread::sleep(RENAME_EXPIRY_TICK);
                    let now = Instant::now();
                    let expired = translator.lock().expire_pending(now);
                    for fs_event in expired {
                        handler.handle_at(fs_event, now);
                    }
                }
            })
            .map_err(|e| MonitorError::WatchFailed { root: root.to_path_buf(), message: e.to_string() })
    }

    /// Unsubscribe every root and stop its expiry ticker. Idempotent.
    pub fn stop(&mut self) {
        for mut subscription in self.subscriptions.drain(..) {
            if let Err(e) = subscription.watcher.unwatch(&subscription.root) {
                debug!("Unwatch {} failed: {}", subscription.root.display(), e);
            }
            subscription.ticker_stop.store(true, Ordering::Release);
            if let Some(ticker) = subscription.ticker.take() {
                if ticker.join().is_err() {
                    warn!("Rename expiry ticker for {} panicked", subscription.root.display());
                }
            }
            debug!("Stopped watching {} folder {}", self.role, subscription.root.display());
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
