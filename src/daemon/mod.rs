//! Monitoring session: watchers, work queue and event processor wired together

pub mod debounce;
pub mod derive;
pub mod event_log;
pub mod image_batch;
pub mod paths;
pub mod perf;
pub mod processor;
pub mod queue;
pub mod rename;
pub mod routing;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};

use self::debounce::EventDeduplicator;
use self::derive::WF_INFO_DIR;
use self::event_log::{EventLog, EventLogKind};
use self::processor::{EventProcessor, ProcessorContext};
use self::queue::{work_queue, WorkSender};
use self::routing::RoutingTable;
use self::watcher::{FolderHandler, FolderWatcher};

/// Supervising controller for one monitoring session
pub struct MonitorSession {
    config: MonitorConfig,
    log: Arc<dyn EventLog>,
    watchers: Vec<FolderWatcher>,
    processor: Option<EventProcessor>,
    failures: Option<mpsc::UnboundedReceiver<MonitorError>>,
    destination: Option<PathBuf>,
}

impl MonitorSession {
    /// Create a session from a validated configuration snapshot
    pub fn new(config: MonitorConfig, log: Arc<dyn EventLog>) -> MonitorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            log,
            watchers: Vec::new(),
            processor: None,
            failures: None,
            destination: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.processor.is_some()
    }

    /// Start the processor and subscribe every watched root.
    ///
    /// A missing root or refused subscription stops whatever was already
    /// started and is returned to the caller.
    pub async fn start(&mut self) -> MonitorResult<()> {
        if self.is_running() {
            warn!("Monitoring session is already running");
            return Ok(());
        }

        let destination = self
            .config
            .destination_folder
            .path()
            .map(PathBuf::from)
            .ok_or_else(|| MonitorError::configuration("No destination folder selected"))?;
        let routing = RoutingTable::new(&self.config.routing_rules)?;

        let wf_info = destination.join(WF_INFO_DIR);
        std::fs::create_dir_all(&wf_info)?;

        let (sender, receiver) = work_queue();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let context = ProcessorContext::new(
            destination.clone(),
            routing,
            self.log.clone(),
            self.config.processor.copy_metadata,
        );
        let mut processor = EventProcessor::new(context, self.config.processor_settings());
        processor.start(receiver)?;

        let watchers = match self.start_watchers(&sender, &wf_info, &failure_tx) {
            Ok(watchers) => watchers,
            Err(e) => {
                error!("Failed to start monitoring: {}", e);
                processor.stop().await;
                return Err(e);
            }
        };

        info!(
            "Monitoring started: {} watcher group(s), destination {}",
            watchers.len(),
            destination.display()
        );
        self.log
            .log_event(EventLogKind::MonitoringStarted, &destination, None);

        self.watchers = watchers;
        self.processor = Some(processor);
        self.failures = Some(failure_rx);
        self.destination = Some(destination);
        Ok(())
    }

    fn start_watchers(
        &self,
        sender: &WorkSender,
        wf_info: &std::path::Path,
        failures: &mpsc::UnboundedSender<MonitorError>,
    ) -> MonitorResult<Vec<FolderWatcher>> {
        let debounce = self.config.debounce_settings();
        let image = self.config.image_settings();
        let mut watchers = Vec::with_capacity(3);

        let mut target_roots = self.config.monitored_folders.clone();
        if let Some(base_date) = self.config.base_date_folder.path() {
            target_roots.push(base_date.to_path_buf());
        }
        let target = FolderHandler::target(
            Arc::new(EventDeduplicator::new(debounce)),
            sender.clone(),
            &self.config.exclude_folders,
            self.log.clone(),
        );
        watchers.push(FolderWatcher::start(Arc::new(target), &target_roots, failures.clone())?);

        if let Some(base_date) = self.config.base_date_folder.path() {
            let handler = FolderHandler::base_date(
                Arc::new(EventDeduplicator::new(debounce)),
                sender.clone(),
                image.clone(),
                self.log.clone(),
            );
            watchers.push(FolderWatcher::start(
                Arc::new(handler),
                &[base_date.to_path_buf()],
                failures.clone(),
            )?);
        }

        let derived = FolderHandler::derived_info(
            Arc::new(EventDeduplicator::new(debounce)),
            sender.clone(),
            image,
            &self.config.target_compare_folders,
            self.log.clone(),
        );
        watchers.push(FolderWatcher::start(
            Arc::new(derived),
            &[wf_info.to_path_buf()],
            failures.clone(),
        )?);

        Ok(watchers)
    }

    /// Unsubscribe watchers, then let the processor finish its cycle.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        info!("Stopping monitoring session...");

        for watcher in self.watchers.iter_mut() {
            watcher.stop();
        }
        self.watchers.clear();

        if let Some(mut processor) = self.processor.take() {
            processor.stop().await;
        }
        self.failures = None;

        if let Some(destination) = self.destination.take() {
            self.log
                .log_event(EventLogKind::MonitoringStopped, &destination, None);
        }
        info!("Monitoring stopped");
    }

    /// Run until `shutdown` fires or a subscription fails.
    ///
    /// A subscription failure stops the session and is returned.
    pub async fn run_until(&mut self, shutdown: CancellationToken) -> MonitorResult<()> {
        if !self.is_running() {
            self.start().await?;
        }

        let failure = match self.failures.as_mut() {
            Some(failures) => tokio::select! {
                _ = shutdown.cancelled() => None,
                Some(failure) = failures.recv() => Some(failure),
            },
            None => {
                shutdown.cancelled().await;
                None
            }
        };

        self.stop().await;
        match failure {
            Some(failure) => {
                error!("Monitoring session failed: {}", failure);
                Err(failure)
            }
            None => Ok(()),
        }
    }
}
