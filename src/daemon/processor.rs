//! Event processor: the single consumer of the work queue.
//!
//! Copy and derive actions run one at a time on the blocking pool, in queue
//! order. Image batches are handed to a small bounded set of workers so a
//! slow render never stalls ingestion.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::derive::TimestampDeriver;
use crate::daemon::event_log::EventLog;
use crate::daemon::image_batch::{BatchKey, EnabledImageBatch, ImageBatchConverter};
use crate::daemon::paths;
use crate::daemon::perf::PerformanceSampler;
use crate::daemon::queue::{FsEventKind, Received, WorkItem, WorkReceiver};
use crate::daemon::routing::RoutingTable;
use crate::error::{MonitorError, MonitorResult};

/// Processor tuning
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Bounded wait on the queue between shutdown checks
    pub poll_interval: Duration,
    /// Maximum concurrent image batches
    pub image_workers: usize,
    /// How long `stop` waits for in-flight batches
    pub shutdown_grace: Duration,
    /// Preserve access and modification times on copies
    pub copy_metadata: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            image_workers: 4,
            shutdown_grace: Duration::from_millis(5000),
            copy_metadata: true,
        }
    }
}

/// Everything an item handler needs, shared with blocking tasks.
pub struct ProcessorContext {
    destination: PathBuf,
    routing: RoutingTable,
    deriver: TimestampDeriver,
    converter: ImageBatchConverter,
    perf: PerformanceSampler,
    log: Arc<dyn EventLog>,
    copy_metadata: bool,
}

impl ProcessorContext {
    pub fn new(
        destination: PathBuf,
        routing: RoutingTable,
        log: Arc<dyn EventLog>,
        copy_metadata: bool,
    ) -> Self {
        Self {
            deriver: TimestampDeriver::new(&destination, log.clone()),
            converter: ImageBatchConverter::new(log.clone()),
            perf: PerformanceSampler::new(),
            destination,
            routing,
            log,
            copy_metadata,
        }
    }

    /// Copy `src` to its routed destination.
    ///
    /// No matching rule and a destination equal to the source are both
    /// logged and treated as success.
    pub fn route_copy(&self, kind: FsEventKind, src: &Path) -> MonitorResult<Option<PathBuf>> {
        let dest = match self.routing.destination(&self.destination, src) {
            Some(dest) => dest,
            None => {
                self.log.log_event(kind.log_kind(), src, None);
                self.log
                    .log_debug(&format!("No routing rule matched {}", src.display()));
                return Ok(None);
            }
        };

        if paths::normalize(src) == dest {
            self.log.log_event(kind.log_kind(), src, Some(&dest));
            self.log
                .log_debug(&format!("Source and destination are the same, no copy: {}", dest.display()));
            return Ok(None);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, &dest)?;

        if self.copy_metadata {
            let meta = fs::metadata(src)?;
            filetime::set_file_times(
                &dest,
                FileTime::from_last_access_time(&meta),
                FileTime::from_last_modification_time(&meta),
            )?;
        }

        self.log.log_event(kind.log_kind(), src, Some(&dest));
        self.log
            .log_debug(&format!("Copied {} to {}", src.display(), dest.display()));
        Ok(Some(dest))
    }
}

/// Shared state of the bounded image worker set
struct BatchPool {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<BatchKey>>>,
    tasks: JoinSet<()>,
}

impl BatchPool {
    fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: JoinSet::new(),
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Image batch task panicked: {}", e);
            }
        }
    }

    async fn drain(&mut self, grace: Duration) {
        if self.tasks.is_empty() {
            return;
        }
        info!("Waiting up to {:?} for {} image batch(es)", grace, self.tasks.len());
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    error!("Image batch task panicked: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Abandoning {} image batch(es) still in flight", self.tasks.len());
            self.tasks.detach_all();
        }
    }
}

/// Single-consumer processing loop over the work queue
pub struct EventProcessor {
    settings: ProcessorSettings,
    context: Arc<ProcessorContext>,
    cancellation_token: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl EventProcessor {
    pub fn new(context: ProcessorContext, settings: ProcessorSettings) -> Self {
        Self {
            settings,
            context: Arc::new(context),
            cancellation_token: CancellationToken::new(),
            task_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Start consuming `receiver` on a background task.
    pub fn start(&mut self, receiver: WorkReceiver) -> MonitorResult<()> {
        if self.task_handle.is_some() {
            return Err(MonitorError::internal("event processor is already running"));
        }

        info!(
            "Starting event processor (poll_interval={:?}, image_workers={})",
            self.settings.poll_interval, self.settings.image_workers
        );

        let context = self.context.clone();
        let settings = self.settings.clone();
        let token = self.cancellation_token.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::processing_loop(context, settings, receiver, token).await;
            info!("Event processor stopped");
        }));
        Ok(())
    }

    /// Signal shutdown and wait for the loop to finish its current item.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.take() {
            let limit = self.settings.poll_interval + self.settings.shutdown_grace + Duration::from_secs(5);
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => debug!("Event processor joined"),
                Ok(Err(e)) => error!("Event processor task panicked: {}", e),
                Err(_) => warn!("Event processor did not stop within {:?}", limit),
            }
        }
    }

    async fn processing_loop(
        context: Arc<ProcessorContext>,
        settings: ProcessorSettings,
        mut receiver: WorkReceiver,
        token: CancellationToken,
    ) {
        let mut pool = BatchPool::new(settings.image_workers);

        loop {
            pool.reap();

            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = receiver.recv_timeout(settings.poll_interval) => received,
            };

            match received {
                Received::Item(item) => {
                    let label = item.label();
                    let src = item.src().to_path_buf();
                    if let Err(e) = Self::process_item(&context, &mut pool, item).await {
                        context.log.log_debug(&format!(
                            "Failed to process {} {}: {}",
                            label,
                            src.display(),
                            e
                        ));
                    }
                }
                Received::Timeout => continue,
                Received::Closed => {
                    debug!("Work queue closed");
                    break;
                }
            }
        }

        pool.drain(settings.shutdown_grace).await;
    }

    async fn process_item(
        context: &Arc<ProcessorContext>,
        pool: &mut BatchPool,
        item: WorkItem,
    ) -> MonitorResult<()> {
        match item {
            WorkItem::Routed { kind: kind @ (FsEventKind::Created | FsEventKind::Modified), src } => {
                let ctx = context.clone();
                run_blocking(move || {
                    ctx.perf.record(kind, &src, ctx.log.as_ref());
                    ctx.route_copy(kind, &src).map(|_| ())
                })
                .await
            }
            WorkItem::Routed { kind, src } => {
                context.perf.record(kind, &src, context.log.as_ref());
                context.log.log_event(kind.log_kind(), &src, None);
                Ok(())
            }
            WorkItem::RoutedWithDest { kind, src, dest } => {
                context.perf.record(kind, &src, context.log.as_ref());
                context.log.log_event(kind.log_kind(), &src, Some(&dest));
                Ok(())
            }
            WorkItem::BaseDateTrigger { src, image } => {
                let ctx = context.clone();
                let marker = run_blocking(move || Ok(ctx.deriver.derive(&src))).await?;
                if let (Some(marker), Some(batch)) = (marker, image.enabled()) {
                    Self::schedule_batch(context, pool, &marker, batch);
                }
                Ok(())
            }
            WorkItem::DerivedInfoTrigger { src, image } => {
                if let Some(batch) = image.enabled() {
                    Self::schedule_batch(context, pool, &src, batch);
                }
                Ok(())
            }
        }
    }

    fn schedule_batch(
        context: &Arc<ProcessorContext>,
        pool: &mut BatchPool,
        trigger: &Path,
        batch: EnabledImageBatch,
    ) {
        let key = match BatchKey::from_trigger(trigger) {
            Some(key) => key,
            None => {
                context.log.log_debug(&format!(
                    "Not a batch trigger (outside wf_info or no timestamp): {}",
                    trigger.display()
                ));
                return;
            }
        };

        if !pool.in_flight.lock().insert(key.clone()) {
            context
                .log
                .log_debug(&format!("Image batch {} already pending", key));
            return;
        }
        context.log.log_debug(&format!(
            "Image batch {} scheduled, waiting {:?}",
            key, batch.wait
        ));

        let ctx = context.clone();
        let semaphore = pool.semaphore.clone();
        let in_flight = pool.in_flight.clone();

        pool.tasks.spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    tokio::time::sleep(batch.wait).await;
                    let converter_ctx = ctx.clone();
                    let batch_key = key.clone();
                    let rendered = tokio::task::spawn_blocking(move || {
                        converter_ctx.converter.convert(&batch_key, &batch)
                    })
                    .await;
                    if let Err(e) = rendered {
                        ctx.log
                            .log_debug(&format!("Image batch {} task failed: {}", key, e));
                    }
                }
                Err(e) => {
                    ctx.log
                        .log_debug(&format!("Image batch {} not run: {}", key, e));
                }
            }
            in_flight.lock().remove(&key);
        });
    }
}

/// Run `f` on the blocking pool, mapping a panicked task to an error.
async fn run_blocking<T, F>(f: F) -> MonitorResult<T>
where
    F: FnOnce() -> MonitorResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MonitorError::internal(format!("blocking task failed: {}", e)))?
}
