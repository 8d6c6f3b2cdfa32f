//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use wafer_monitor::daemon::processor::{EventProcessor, ProcessorContext, ProcessorSettings};
use wafer_monitor::daemon::queue::{work_queue, WorkSender};
use wafer_monitor::daemon::routing::RoutingTable;
use wafer_monitor::{RecordingEventLog, RoutingRule};

/// Build routing rules from `(pattern, subfolder)` pairs
pub fn rules(pairs: &[(&str, &str)]) -> Vec<RoutingRule> {
    pairs
        .iter()
        .map(|(pattern, subfolder)| RoutingRule {
            pattern: pattern.to_string(),
            subfolder: PathBuf::from(subfolder),
        })
        .collect()
}

/// Processor settings with a short poll so tests stay quick
pub fn fast_settings() -> ProcessorSettings {
    ProcessorSettings {
        poll_interval: Duration::from_millis(50),
        image_workers: 2,
        shutdown_grace: Duration::from_secs(5),
        copy_metadata: true,
    }
}

/// Start a processor over `dest` and hand back the queue producer.
pub fn start_processor(
    dest: &Path,
    routing: &[(&str, &str)],
    log: Arc<RecordingEventLog>,
) -> (EventProcessor, WorkSender) {
    start_processor_with(dest, routing, log, fast_settings())
}

/// `start_processor` with explicit settings.
pub fn start_processor_with(
    dest: &Path,
    routing: &[(&str, &str)],
    log: Arc<RecordingEventLog>,
    settings: ProcessorSettings,
) -> (EventProcessor, WorkSender) {
    let table = RoutingTable::new(&rules(routing)).unwrap();
    let context = ProcessorContext::new(dest.to_path_buf(), table, log, true);
    let mut processor = EventProcessor::new(context, settings);
    let (sender, receiver) = work_queue();
    processor.start(receiver).unwrap();
    (processor, sender)
}

/// Poll `condition` every 25ms until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Write a solid-colour PNG of the given size.
pub fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([40, 120, 200]))
        .save(path)
        .unwrap();
}
