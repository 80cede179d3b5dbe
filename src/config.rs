//! Shared surveillance configuration with atomic-snapshot reads and
//! whole-structure persistence.
//!
//! Every reader gets an `Arc` snapshot; writers go through a single
//! mutex so concurrent command application is linearized. The persisted
//! file is plain JSON: a missing file means defaults, a corrupt file is
//! logged and replaced by defaults rather than failing startup.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ConfigError;

/// Preferred container codec for video artifacts. The media collaborator
/// may fall back if the preference is not available on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Avc1,
    Mp4v,
}

impl VideoCodec {
    pub fn fourcc(&self) -> &'static str {
        match self {
            VideoCodec::Avc1 => "avc1",
            VideoCodec::Mp4v => "mp4v",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    #[serde(default = "default_enabled")]
    pub surveillance_enabled: bool,
    /// Motion sensitivity, 0 (numb) ..= 100 (hair trigger).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Allowed gap in the motion signal before an active event ends.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    #[serde(default = "default_max_event_seconds")]
    pub max_event_seconds: u64,
    #[serde(default = "default_timestamp_overlay")]
    pub timestamp_overlay: bool,
    #[serde(default = "default_motion_contours")]
    pub draw_motion_contours: bool,
    /// Interval between progress photos while a motion video records.
    /// Zero disables progress photos.
    #[serde(default = "default_picture_interval")]
    pub picture_interval_seconds: u64,
    /// Duration of an on-demand video capture.
    #[serde(default = "default_manual_video_seconds")]
    pub manual_video_seconds: u64,
    #[serde(default)]
    pub video_codec: VideoCodec,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    false
}
fn default_sensitivity() -> u8 {
    50
}
fn default_cooldown_seconds() -> u64 {
    5
}
fn default_grace_seconds() -> u64 {
    2
}
fn default_max_event_seconds() -> u64 {
    30
}
fn default_timestamp_overlay() -> bool {
    true
}
fn default_motion_contours() -> bool {
    true
}
fn default_picture_interval() -> u64 {
    5
}
fn default_manual_video_seconds() -> u64 {
    5
}
fn default_media_dir() -> PathBuf {
    std::env::temp_dir()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            surveillance_enabled: default_enabled(),
            sensitivity: default_sensitivity(),
            cooldown_seconds: default_cooldown_seconds(),
            grace_seconds: default_grace_seconds(),
            max_event_seconds: default_max_event_seconds(),
            timestamp_overlay: default_timestamp_overlay(),
            draw_motion_contours: default_motion_contours(),
            picture_interval_seconds: default_picture_interval(),
            manual_video_seconds: default_manual_video_seconds(),
            video_codec: VideoCodec::default(),
            media_dir: default_media_dir(),
            persistence_path: None,
        }
    }
}

impl WatchConfig {
    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_seconds as i64)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds as i64)
    }

    pub fn max_event(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_event_seconds as i64)
    }

    pub fn manual_video(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.manual_video_seconds as i64)
    }
}

/// Concurrently shared configuration store.
///
/// `snapshot` hands out the current `Arc<WatchConfig>`; `update` performs
/// a read-modify-write under one mutex and atomically replaces the whole
/// structure, so no reader ever observes a partial write.
pub struct ConfigStore {
    inner: Mutex<Arc<WatchConfig>>,
}

impl ConfigStore {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            inner: Mutex::new(Arc::new(config)),
        }
    }

    /// Loads persisted state from `path` if present, otherwise defaults.
    /// Corruption is logged and answered with defaults.
    pub fn load(path: Option<PathBuf>) -> Self {
        let mut config = match &path {
            Some(p) if p.exists() => match read_config(p) {
                Ok(cfg) => {
                    info!("Config loaded from {}", p.display());
                    cfg
                }
                Err(e) => {
                    error!("{} - falling back to defaults", e);
                    WatchConfig::default()
                }
            },
            Some(p) => {
                warn!("Config file {} not found, using defaults", p.display());
                WatchConfig::default()
            }
            None => WatchConfig::default(),
        };
        config.persistence_path = path;
        Self::new(config)
    }

    pub fn snapshot(&self) -> Arc<WatchConfig> {
        self.inner.lock().unwrap().clone()
    }

    /// Applies `mutate` to a copy of the current config, persists the
    /// result when a persistence location is set, and swaps it in.
    pub fn update(&self, mutate: impl FnOnce(&mut WatchConfig)) -> Arc<WatchConfig> {
        let mut guard = self.inner.lock().unwrap();
        let mut next = (**guard).clone();
        mutate(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        drop(guard);

        if let Err(e) = self.persist_config(&next) {
            warn!("{}", e);
        }
        next
    }

    /// Writes the current snapshot to the persistence path, if any.
    pub fn persist(&self) -> Result<(), ConfigError> {
        self.persist_config(&self.snapshot())
    }

    fn persist_config(&self, config: &WatchConfig) -> Result<(), ConfigError> {
        let Some(path) = &config.persistence_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?;
        fs::write(path, json).map_err(|e| ConfigError::Write {
            path: path.clone(),
            source: e,
        })
    }
}

fn read_config(path: &PathBuf) -> Result<WatchConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        source: e,
    })?;
    serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        source: e,
    })
}
