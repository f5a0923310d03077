//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::iptv::DEFAULT_STREAM_TYPE;
use crate::lamedb::LamedbVersion;

pub const MIN_BATCH: usize = 100;
pub const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Derive new bouquet file names from display names instead of `deNN`.
    #[serde(default)]
    pub force_bq_names: bool,
    #[serde(default = "default_lamedb_version")]
    pub lamedb_version: u8,
    #[serde(default = "default_true")]
    pub backup_before_save: bool,
    // Backups go next to the target directory unless set
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_stream_type")]
    pub default_stream_type: u32,
    #[serde(default = "default_batch")]
    pub batch_size: usize,
    /// Insert a marker before each `group-title` run on M3U import.
    #[serde(default)]
    pub markers_for_m3u_groups: bool,
    /// Receiver address used when exporting DVB services to M3U.
    #[serde(default)]
    pub stream_host: String,
}

fn default_lamedb_version() -> u8 { 4 }
fn default_true() -> bool { true }
fn default_stream_type() -> u32 { DEFAULT_STREAM_TYPE }
fn default_batch() -> usize { 250 }

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            force_bq_names: false,
            lamedb_version: 4,
            backup_before_save: true,
            backup_dir: None,
            default_stream_type: DEFAULT_STREAM_TYPE,
            batch_size: 250,
            markers_for_m3u_groups: false,
            stream_host: String::new(),
        }
    }
}

impl EditorConfig {
    fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("stb_settings");
        path.push("config.json");
        path
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("{}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::format(path.display().to_string(), e.to_string()))?;
        fs::write(path, content).map_err(|e| Error::io(path, e))
    }

    pub fn lamedb_version(&self) -> LamedbVersion {
        match self.lamedb_version {
            5 => LamedbVersion::V5,
            _ => LamedbVersion::V4,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH, MAX_BATCH)
    }
}

/// Options of one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    pub force_bq_names: bool,
    pub lamedb_version: LamedbVersion,
    pub backup_before_save: bool,
    pub backup_dir: Option<PathBuf>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::from(&EditorConfig::default())
    }
}

impl From<&EditorConfig> for SaveOptions {
    fn from(config: &EditorConfig) -> Self {
        Self {
            force_bq_names: config.force_bq_names,
            lamedb_version: config.lamedb_version(),
            backup_before_save: config.backup_before_save,
            backup_dir: config.backup_dir.clone(),
        }
    }
}
