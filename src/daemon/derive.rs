//! Timestamp marker derivation from tool-generated text logs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use encoding_rs::{Encoding, EUC_KR, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::daemon::event_log::{EventLog, EventLogKind};
use crate::error::MonitorResult;

/// Name of the derived-info subfolder under the destination root.
pub const WF_INFO_DIR: &str = "wf_info";

/// Extension of marker files.
pub const MARKER_EXTENSION: &str = "na";

static DATE_TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Date and Time:\s+(\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2}:\d{2}\s+[APM]{2})")
        .expect("valid date pattern")
});

/// Decode `bytes` with the first encoding that accepts them, trying the
/// legacy Korean code page, then UTF-8, then Latin-1.
pub fn decode_text(bytes: &[u8]) -> Option<(String, &'static str)> {
    let encodings: [&'static Encoding; 3] = [EUC_KR, UTF_8, WINDOWS_1252];
    encodings.iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| (text.into_owned(), encoding.name()))
    })
}

/// Find the `Date and Time:` line and reformat it as `YYYYMMDD_HHMMSS`.
pub fn extract_timestamp(text: &str) -> Option<String> {
    let caps = DATE_TIME_PATTERN.captures(text)?;
    let raw = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    let parsed = NaiveDateTime::parse_from_str(&raw, "%m/%d/%Y %I:%M:%S %p").ok()?;
    Some(parsed.format("%Y%m%d_%H%M%S").to_string())
}

/// Creates zero-byte `<timestamp>_<stem>.na` markers in the `wf_info` folder.
#[derive(Clone)]
pub struct TimestampDeriver {
    wf_info: PathBuf,
    log: Arc<dyn EventLog>,
}

impl TimestampDeriver {
    pub fn new(destination_root: &Path, log: Arc<dyn EventLog>) -> Self {
        Self { wf_info: destination_root.join(WF_INFO_DIR), log }
    }

    /// Derive a marker for `src`. Returns the marker path, or `None` when no
    /// timestamp was found or anything failed (failures are logged).
    pub fn derive(&self, src: &Path) -> Option<PathBuf> {
        match self.try_derive(src) {
            Ok(marker) => marker,
            Err(e) => {
                self.log
                    .log_debug(&format!("Timestamp derivation failed for {}: {}", src.display(), e));
                None
            }
        }
    }

    fn try_derive(&self, src: &Path) -> MonitorResult<Option<PathBuf>> {
        let bytes = fs::read(src)?;

        let (text, encoding) = match decode_text(&bytes) {
            Some(decoded) => decoded,
            None => {
                self.log
                    .log_debug(&format!("Could not decode {} with any known encoding", src.display()));
                return Ok(None);
            }
        };

        let timestamp = match extract_timestamp(&text) {
            Some(ts) => ts,
            None => {
                self.log
                    .log_debug(&format!("No Date and Time line in {} ({})", src.display(), encoding));
                return Ok(None);
            }
        };

        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        fs::create_dir_all(&self.wf_info)?;
        let marker = self
            .wf_info
            .join(format!("{}_{}.{}", timestamp, stem, MARKER_EXTENSION));
        File::create(&marker)?;

        self.log.log_event(EventLogKind::FileCreated, &marker, None);
        Ok(Some(marker))
    }
}
