//! Event processor pipeline tests
//!
//! Work items are pushed straight onto the queue and the observable outcome
//! (copied files, markers, PDFs, recorded events) is checked.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fast_settings, start_processor, start_processor_with, wait_for, write_png};
use tempfile::TempDir;
use wafer_monitor::daemon::image_batch::ImageBatchSettings;
use wafer_monitor::daemon::queue::{FsEventKind, WorkItem};
use wafer_monitor::{EventLogKind, RecordingEventLog};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_first_matching_rule_routes_copy() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let src = src_dir.path().join("ABC.txt");
    fs::write(&src, b"lot data").unwrap();

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) =
        start_processor(dest_dir.path(), &[("A.*", "f1"), (".*", "f2")], log.clone());

    sender
        .push(WorkItem::Routed { kind: FsEventKind::Created, src: src.clone() })
        .unwrap();

    let expected = dest_dir.path().join("f1").join("ABC.txt");
    assert!(wait_for(WAIT, || expected.exists()).await);
    processor.stop().await;

    assert_eq!(fs::read(&expected).unwrap(), b"lot data");
    assert!(!dest_dir.path().join("f2").join("ABC.txt").exists());

    let created = log.events_of(EventLogKind::Created);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].dest.as_deref(), Some(expected.as_path()));
}

#[tokio::test]
async fn test_failed_item_does_not_stop_processing() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    // A plain file where the routed subfolder should be.
    fs::write(dest_dir.path().join("blocked"), b"").unwrap();

    let bad = src_dir.path().join("bad.txt");
    let good = src_dir.path().join("good.txt");
    fs::write(&bad, b"bad").unwrap();
    fs::write(&good, b"good").unwrap();

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) =
        start_processor(dest_dir.path(), &[("^bad", "blocked/sub"), (".*", "ok")], log.clone());

    sender
        .push(WorkItem::Routed { kind: FsEventKind::Created, src: bad })
        .unwrap();
    sender
        .push(WorkItem::Routed { kind: FsEventKind::Modified, src: good })
        .unwrap();

    let expected = dest_dir.path().join("ok").join("good.txt");
    assert!(wait_for(WAIT, || expected.exists()).await);
    processor.stop().await;

    assert!(log.has_debug("Failed to process routed"));
    assert_eq!(log.events_of(EventLogKind::Modified).len(), 1);
}

#[tokio::test]
async fn test_moves_and_deletes_are_logged_without_copy() {
    let dest_dir = TempDir::new().unwrap();
    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[(".*", "all")], log.clone());

    sender
        .push(WorkItem::RoutedWithDest {
            kind: FsEventKind::Moved,
            src: PathBuf::from("/in/a.txt"),
            dest: PathBuf::from("/in/b.txt"),
        })
        .unwrap();
    sender
        .push(WorkItem::Routed { kind: FsEventKind::Deleted, src: PathBuf::from("/in/c.txt") })
        .unwrap();

    assert!(wait_for(WAIT, || log.events().len() == 2).await);
    processor.stop().await;

    let moved = log.events_of(EventLogKind::Moved);
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].dest, Some(PathBuf::from("/in/b.txt")));
    assert_eq!(log.events_of(EventLogKind::Deleted).len(), 1);
    assert!(!dest_dir.path().join("all").exists());
}

#[tokio::test]
async fn test_base_date_log_derives_marker() {
    let base_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let src = base_dir.path().join("LOTX.log");
    let (encoded, _, _) =
        encoding_rs::EUC_KR.encode("장비: 검사기\r\nDate and Time:  01/02/2024 03:04:05 PM\r\n");
    fs::write(&src, &encoded).unwrap();

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());

    sender
        .push(WorkItem::BaseDateTrigger { src, image: ImageBatchSettings::default() })
        .unwrap();

    let marker = dest_dir.path().join("wf_info").join("20240102_150405_LOTX.na");
    assert!(wait_for(WAIT, || marker.exists()).await);
    processor.stop().await;

    assert_eq!(fs::metadata(&marker).unwrap().len(), 0);
    let created = log.events_of(EventLogKind::FileCreated);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].src, marker);
}

#[tokio::test]
async fn test_base_date_without_timestamp_creates_nothing() {
    let base_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let src = base_dir.path().join("LOTY.log");
    fs::write(&src, b"nothing to see").unwrap();

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());
    sender
        .push(WorkItem::BaseDateTrigger { src, image: ImageBatchSettings::default() })
        .unwrap();

    assert!(wait_for(WAIT, || log.has_debug("No Date and Time line")).await);
    processor.stop().await;
    assert!(log.events_of(EventLogKind::FileCreated).is_empty());
}

#[tokio::test]
async fn test_image_batch_renders_ordered_pdf() {
    let base_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let save = TempDir::new().unwrap();

    let src = base_dir.path().join("LOTX.log");
    fs::write(&src, "Date and Time: 01/02/2024 03:04:05 PM\n").unwrap();

    write_png(&images.path().join("20240102_150405_LOTX_10.png"), 6, 7);
    write_png(&images.path().join("20240102_150405_LOTX_2.png"), 4, 5);
    write_png(&images.path().join("20240102_150405_LOTX_1.png"), 2, 3);
    write_png(&images.path().join("unrelated.png"), 9, 9);

    let settings = ImageBatchSettings {
        target_image_folder: Some(images.path().to_path_buf()),
        wait: Some(Duration::ZERO),
        image_save_folder: Some(save.path().join("pdf")),
    };

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());
    sender
        .push(WorkItem::BaseDateTrigger { src, image: settings })
        .unwrap();

    let pdf = save.path().join("pdf").join("20240102_150405_LOTX.pdf");
    assert!(wait_for(WAIT, || !log.events_of(EventLogKind::PdfCreated).is_empty()).await);
    processor.stop().await;
    assert!(pdf.exists());

    let doc = lopdf::Document::load(&pdf).unwrap();
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 3);

    let boxes: Vec<(i64, i64)> = pages
        .values()
        .map(|id| {
            let page = doc.get_object(*id).unwrap().as_dict().unwrap();
            let media = page.get(b"MediaBox").unwrap().as_array().unwrap();
            (media[2].as_i64().unwrap(), media[3].as_i64().unwrap())
        })
        .collect();
    assert_eq!(boxes, vec![(2, 3), (4, 5), (6, 7)]);
}

#[tokio::test]
async fn test_image_batch_without_images_is_skipped() {
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let save = TempDir::new().unwrap();
    let wf_info = dest_dir.path().join("wf_info");
    fs::create_dir_all(&wf_info).unwrap();

    let settings = ImageBatchSettings {
        target_image_folder: Some(images.path().to_path_buf()),
        wait: Some(Duration::ZERO),
        image_save_folder: Some(save.path().to_path_buf()),
    };

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());
    sender
        .push(WorkItem::DerivedInfoTrigger {
            src: wf_info.join("20240102_150405_LOTZ.na"),
            image: settings,
        })
        .unwrap();

    assert!(wait_for(WAIT, || log.has_debug("No images for batch")).await);
    processor.stop().await;
    assert!(log.events_of(EventLogKind::PdfCreated).is_empty());
    assert_eq!(fs::read_dir(save.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_trigger_outside_wf_info_is_not_a_batch() {
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();

    let settings = ImageBatchSettings {
        target_image_folder: Some(images.path().to_path_buf()),
        wait: Some(Duration::ZERO),
        image_save_folder: Some(images.path().join("out")),
    };

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());
    sender
        .push(WorkItem::DerivedInfoTrigger {
            src: PathBuf::from("/elsewhere/20240102_150405_LOTZ.na"),
            image: settings,
        })
        .unwrap();

    assert!(wait_for(WAIT, || log.has_debug("Not a batch trigger")).await);
    processor.stop().await;
}

fn batch_settings(images: &Path, save: &Path, wait: Duration) -> ImageBatchSettings {
    ImageBatchSettings {
        target_image_folder: Some(images.to_path_buf()),
        wait: Some(wait),
        image_save_folder: Some(save.to_path_buf()),
    }
}

#[tokio::test]
async fn test_base_date_and_marker_triggers_render_one_pdf() {
    let base_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let save = TempDir::new().unwrap();

    let src = base_dir.path().join("LOTX.log");
    fs::write(&src, "Date and Time: 01/02/2024 03:04:05 PM\n").unwrap();
    write_png(&images.path().join("20240102_150405_LOTX_1.png"), 2, 2);
    let settings = batch_settings(images.path(), save.path(), Duration::from_secs(1));

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[], log.clone());

    sender
        .push(WorkItem::BaseDateTrigger { src, image: settings.clone() })
        .unwrap();
    sender
        .push(WorkItem::DerivedInfoTrigger {
            src: dest_dir.path().join("wf_info").join("20240102_150405_LOTX.na"),
            image: settings,
        })
        .unwrap();

    assert!(wait_for(WAIT, || !log.events_of(EventLogKind::PdfCreated).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    processor.stop().await;

    assert!(log.has_debug("already pending"));
    assert_eq!(log.events_of(EventLogKind::PdfCreated).len(), 1);
}

#[tokio::test]
async fn test_waiting_batch_does_not_stall_copies() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let save = TempDir::new().unwrap();
    let wf_info = dest_dir.path().join("wf_info");
    fs::create_dir_all(&wf_info).unwrap();
    write_png(&images.path().join("20240102_150405_LOTS_1.png"), 2, 2);

    let copied = src_dir.path().join("late.txt");
    fs::write(&copied, b"late").unwrap();

    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor(dest_dir.path(), &[(".*", "all")], log.clone());

    sender
        .push(WorkItem::DerivedInfoTrigger {
            src: wf_info.join("20240102_150405_LOTS.na"),
            image: batch_settings(images.path(), save.path(), Duration::from_secs(2)),
        })
        .unwrap();
    sender
        .push(WorkItem::Routed { kind: FsEventKind::Created, src: copied })
        .unwrap();

    let copy = dest_dir.path().join("all").join("late.txt");
    assert!(wait_for(WAIT, || copy.exists()).await);
    assert!(log.events_of(EventLogKind::PdfCreated).is_empty());

    assert!(wait_for(WAIT, || !log.events_of(EventLogKind::PdfCreated).is_empty()).await);
    processor.stop().await;

    let kinds: Vec<EventLogKind> = log.events().iter().map(|r| r.kind).collect();
    let copied_at = kinds.iter().position(|k| *k == EventLogKind::Created).unwrap();
    let pdf_at = kinds.iter().position(|k| *k == EventLogKind::PdfCreated).unwrap();
    assert!(copied_at < pdf_at);
}

#[tokio::test]
async fn test_single_image_worker_runs_batches_one_at_a_time() {
    let dest_dir = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    let save = TempDir::new().unwrap();
    let wf_info = dest_dir.path().join("wf_info");
    fs::create_dir_all(&wf_info).unwrap();
    write_png(&images.path().join("20240102_150405_LOTA_1.png"), 2, 2);
    write_png(&images.path().join("20240102_150405_LOTB_1.png"), 2, 2);

    let mut settings = fast_settings();
    settings.image_workers = 1;
    let log = Arc::new(RecordingEventLog::new());
    let (mut processor, sender) = start_processor_with(dest_dir.path(), &[], log.clone(), settings);

    let wait = Duration::from_secs(1);
    let started = Instant::now();
    for tag in ["LOTA", "LOTB"] {
        sender
            .push(WorkItem::DerivedInfoTrigger {
                src: wf_info.join(format!("20240102_150405_{}.na", tag)),
                image: batch_settings(images.path(), save.path(), wait),
            })
            .unwrap();
    }

    assert!(wait_for(WAIT, || log.events_of(EventLogKind::PdfCreated).len() == 2).await);
    let elapsed = started.elapsed();
    processor.stop().await;

    // Each batch holds the only worker through its wait.
    assert!(elapsed >= wait * 2, "two batches finished in {:?}", elapsed);
}
