//! Image batch conversion: collect same-batch images and render them as one PDF.
//!
//! A batch is keyed by the leading `<date>_<time>` token of a marker file and
//! the tag that follows it. Each page of the output document is exactly the
//! pixel size of its image.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::daemon::derive::WF_INFO_DIR;
use crate::daemon::event_log::{EventLog, EventLogKind};
use crate::daemon::paths;
use crate::error::{MonitorError, MonitorResult};

static BATCH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8}_\d{6})(?:_([^_.]+))?").expect("valid batch pattern"));

static PAGE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d+)\.[^.]+$").expect("valid page suffix pattern"));

static BASE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)(?:_\d+)?\.[^.]+$").expect("valid base name pattern"));

/// Session-invariant image batch configuration carried by trigger work items.
///
/// `None` in any field disables batching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBatchSettings {
    pub target_image_folder: Option<PathBuf>,
    pub wait: Option<Duration>,
    pub image_save_folder: Option<PathBuf>,
}

/// Fully configured image batching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledImageBatch {
    pub target_image_folder: PathBuf,
    pub wait: Duration,
    pub image_save_folder: PathBuf,
}

impl ImageBatchSettings {
    pub fn enabled(&self) -> Option<EnabledImageBatch> {
        Some(EnabledImageBatch {
            target_image_folder: self.target_image_folder.clone()?,
            wait: self.wait?,
            image_save_folder: self.image_save_folder.clone()?,
        })
    }
}

/// Timestamp token and optional secondary tag identifying one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub timestamp: String,
    pub tag: Option<String>,
}

impl BatchKey {
    /// Key for a trigger file. `None` unless the trigger lives under a
    /// `wf_info` folder and starts with a `<date>_<time>` token.
    pub fn from_trigger(trigger: &Path) -> Option<Self> {
        if !paths::has_segment(trigger, WF_INFO_DIR) {
            return None;
        }
        let name = paths::file_name_lossy(trigger);
        let caps = BATCH_PATTERN.captures(&name)?;
        Some(Self {
            timestamp: caps[1].to_string(),
            tag: caps.get(2).map(|m| m.as_str().to_string()),
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.contains(&self.timestamp)
            && self.tag.as_deref().map_or(true, |tag| file_name.contains(tag))
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}_{}", self.timestamp, tag),
            None => f.write_str(&self.timestamp),
        }
    }
}

/// Recursively collect files under `folder` whose names match `key`.
pub fn collect_images(folder: &Path, key: &BatchKey) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| key.matches(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect()
}

fn page_number(path: &Path) -> Option<u64> {
    let name = paths::file_name_lossy(path);
    PAGE_SUFFIX
        .captures(&name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Sort by trailing `_<n>` suffix; unnumbered files follow, then by name.
pub fn order_pages(images: &mut [PathBuf]) {
    images.sort_by_cached_key(|path| {
        let number = page_number(path);
        (number.is_none(), number.unwrap_or(0), paths::file_name_lossy(path))
    });
}

/// Output document name shared by every image in the batch.
pub fn common_base_name(images: &[PathBuf], fallback: &str) -> String {
    let stems: Vec<String> = images
        .iter()
        .map(|path| {
            let name = paths::file_name_lossy(path);
            match BASE_NAME.captures(&name) {
                Some(caps) => caps[1].to_string(),
                None => name,
            }
        })
        .collect();

    let mut prefix = match stems.first() {
        Some(first) => first.clone(),
        None => return fallback.to_string(),
    };
    for stem in &stems[1..] {
        let shared = prefix
            .char_indices()
            .zip(stem.chars())
            .find(|((_, a), b)| a != b)
            .map(|((idx, _), _)| idx);
        if let Some(idx) = shared {
            prefix.truncate(idx);
        } else if stem.len() < prefix.len() {
            prefix.truncate(stem.len());
        }
    }

    let trimmed = prefix.trim_end_matches('_');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render `images` in order into a PDF at `output`, one page per image.
pub fn render_pdf(images: &[PathBuf], output: &Path) -> MonitorResult<()> {
    if images.is_empty() {
        return Err(MonitorError::Pdf { message: "no images to render".to_string() });
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(images.len());

    for path in images {
        let rgb = image::open(path)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        let (width, height) = (i64::from(width), i64::from(height));

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
            },
            rgb.into_raw(),
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(output)?;
    Ok(())
}

/// Collects a batch after its wait and renders it.
///
/// The wait itself belongs to the caller so it can sleep without holding a
/// blocking thread.
#[derive(Clone)]
pub struct ImageBatchConverter {
    log: Arc<dyn EventLog>,
}

impl ImageBatchConverter {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Collect and render one batch. Returns the PDF path on success; no
    /// matches and render failures are logged and yield `None`.
    pub fn convert(&self, key: &BatchKey, batch: &EnabledImageBatch) -> Option<PathBuf> {
        let mut images = collect_images(&batch.target_image_folder, key);
        if images.is_empty() {
            self.log.log_debug(&format!(
                "No images for batch {} in {}",
                key,
                batch.target_image_folder.display()
            ));
            return None;
        }
        order_pages(&mut images);

        let base_name = common_base_name(&images, &key.timestamp);
        let output = batch.image_save_folder.join(format!("{}.pdf", base_name));

        let rendered = std::fs::create_dir_all(&batch.image_save_folder)
            .map_err(MonitorError::from)
            .and_then(|_| render_pdf(&images, &output));

        match rendered {
            Ok(()) => {
                self.log.log_debug(&format!(
                    "Rendered {} page(s) for batch {} into {}",
                    images.len(),
                    key,
                    output.display()
                ));
                self.log.log_event(EventLogKind::PdfCreated, &output, None);
                Some(output)
            }
            Err(e) => {
                self.log
                    .log_debug(&format!("Image batch {} abandoned: {}", key, e));
                None
            }
        }
    }
}
