//! Configuration for the wafer monitor
//!
//! The configuration is a read-only snapshot for one monitoring session. It is
//! stored as YAML; folders that the operator has not picked are written as
//! `Unselected`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::daemon::debounce::DebounceSettings;
use crate::daemon::derive::WF_INFO_DIR;
use crate::daemon::image_batch::ImageBatchSettings;
use crate::daemon::processor::ProcessorSettings;
use crate::daemon::routing::RoutingTable;
use crate::error::{MonitorError, MonitorResult};
use crate::logging::LoggingConfig;

/// Sentinel for a folder that has not been chosen.
pub const UNSELECTED: &str = "Unselected";

/// Wait times offered to operators, in seconds.
pub const WAIT_TIME_CHOICES: [u64; 6] = [60, 120, 180, 240, 300, 600];

/// Optional folder that serializes `None` as `Unselected`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FolderSetting(pub Option<PathBuf>);

impl FolderSetting {
    pub fn unselected() -> Self {
        Self(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.0.as_deref()
    }

    pub fn is_selected(&self) -> bool {
        self.0.is_some()
    }
}

impl From<String> for FolderSetting {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == UNSELECTED {
            Self(None)
        } else {
            Self(Some(PathBuf::from(trimmed)))
        }
    }
}

impl From<FolderSetting> for String {
    fn from(folder: FolderSetting) -> String {
        folder.to_string()
    }
}

impl From<&str> for FolderSetting {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl fmt::Display for FolderSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) => write!(f, "{}", path.display()),
            None => f.write_str(UNSELECTED),
        }
    }
}

/// One routing rule: files whose name matches `pattern` go to `subfolder`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub pattern: String,
    pub subfolder: PathBuf,
}

/// Image batch section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Folder scanned for batch images
    pub target_image_folder: FolderSetting,
    /// Delay before scanning, in seconds; absent or zero disables batching
    pub wait_time_secs: Option<u64>,
    /// Folder receiving rendered PDFs
    pub image_save_folder: FolderSetting,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            target_image_folder: FolderSetting::unselected(),
            wait_time_secs: Some(WAIT_TIME_CHOICES[0]),
            image_save_folder: FolderSetting::unselected(),
        }
    }
}

/// Debounce section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub window_ms: u64,
    pub creation_shadow_ms: u64,
    pub retention_factor: u32,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: 1000,
            creation_shadow_ms: 1000,
            retention_factor: 10,
        }
    }
}

/// Processor section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    pub image_workers: usize,
    pub shutdown_grace_ms: u64,
    pub copy_metadata: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            image_workers: 4,
            shutdown_grace_ms: 5000,
            copy_metadata: true,
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Target roots whose files are routed by regex
    pub monitored_folders: Vec<PathBuf>,
    /// Root for routed copies and the `wf_info` folder
    pub destination_folder: FolderSetting,
    /// Ordered routing rules, first match wins
    pub routing_rules: Vec<RoutingRule>,
    /// Directory prefixes ignored under target roots
    pub exclude_folders: Vec<PathBuf>,
    /// Folder whose logs drive timestamp markers
    pub base_date_folder: FolderSetting,
    /// Folders searched for `#1` placeholder files
    pub target_compare_folders: Vec<PathBuf>,
    pub image: ImageConfig,
    pub debounce: DebounceConfig,
    pub processor: ProcessorConfig,
    pub logging: LoggingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitored_folders: Vec::new(),
            destination_folder: FolderSetting::unselected(),
            routing_rules: Vec::new(),
            exclude_folders: Vec::new(),
            base_date_folder: FolderSetting::unselected(),
            target_compare_folders: Vec::new(),
            image: ImageConfig::default(),
            debounce: DebounceConfig::default(),
            processor: ProcessorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a YAML file, or from defaults plus environment
    /// overrides when no path is given.
    pub fn load(config_path: Option<&Path>) -> MonitorResult<Self> {
        match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)
                    .map_err(|e| MonitorError::configuration(format!("Invalid YAML in {}: {}", path.display(), e)))
            }
            None => Self::from_env(),
        }
    }

    fn from_env() -> MonitorResult<Self> {
        let mut config = Self::default();

        if let Ok(destination) = std::env::var("WAFER_MONITOR_DESTINATION") {
            config.destination_folder = FolderSetting::from(destination);
        }

        if let Some(folders) = std::env::var_os("WAFER_MONITOR_FOLDERS") {
            config.monitored_folders = std::env::split_paths(&folders)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Ok(base_date) = std::env::var("WAFER_MONITOR_BASE_DATE_FOLDER") {
            config.base_date_folder = FolderSetting::from(base_date);
        }

        config.logging = LoggingConfig::from_environment();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> MonitorResult<()> {
        let content = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if self.processor.poll_interval_ms == 0 {
            return Err(MonitorError::configuration("Poll interval must be greater than 0"));
        }

        if self.processor.image_workers == 0 {
            return Err(MonitorError::configuration("Image workers must be greater than 0"));
        }

        if self.debounce.window_ms == 0 {
            return Err(MonitorError::configuration("Debounce window must be greater than 0"));
        }

        RoutingTable::new(&self.routing_rules)?;

        let needs_destination = !self.routing_rules.is_empty()
            || !self.monitored_folders.is_empty()
            || self.base_date_folder.is_selected();
        if needs_destination && !self.destination_folder.is_selected() {
            return Err(MonitorError::configuration(
                "A destination folder is required when folders or routing rules are configured",
            ));
        }

        if let Some(wait) = self.image.wait_time_secs.filter(|secs| *secs > 0) {
            if !WAIT_TIME_CHOICES.contains(&wait) {
                warn!(
                    "Image wait time {}s is not one of the standard choices {:?}",
                    wait, WAIT_TIME_CHOICES
                );
            }
        }

        Ok(())
    }

    /// Session-invariant image batch settings. A zero or absent wait time
    /// disables batching.
    pub fn image_settings(&self) -> ImageBatchSettings {
        ImageBatchSettings {
            target_image_folder: self.image.target_image_folder.0.clone(),
            wait: self
                .image
                .wait_time_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            image_save_folder: self.image.image_save_folder.0.clone(),
        }
    }

    /// `<destination>/wf_info`, when a destination is selected.
    pub fn wf_info_folder(&self) -> Option<PathBuf> {
        self.destination_folder.path().map(|dest| dest.join(WF_INFO_DIR))
    }

    pub fn debounce_settings(&self) -> DebounceSettings {
        DebounceSettings {
            window: Duration::from_millis(self.debounce.window_ms),
            creation_shadow: Duration::from_millis(self.debounce.creation_shadow_ms),
            retention_factor: self.debounce.retention_factor,
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            poll_interval: Duration::from_millis(self.processor.poll_interval_ms),
            image_workers: self.processor.image_workers,
            shutdown_grace: Duration::from_millis(self.processor.shutdown_grace_ms),
            copy_metadata: self.processor.copy_metadata,
        }
    }
}
