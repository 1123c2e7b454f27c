//! Optional TOML configuration file.
//!
//! ```toml
//! folder = "recordings"
//!
//! [settings]
//! flush_interval = 100        # milliseconds
//! flush_threshold_chunks = 1
//! open_timeout = 5000         # milliseconds
//!
//! [session]
//! device_index = 0
//! channel_count = 1
//! sample_rate = 44100
//! encoding = "flac16"      # flac16, flac24, pcm16, pcm24, float32
//! ```
//!
//! Every key is optional. Command line flags override the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use audio_recorder_core::{ControllerSettings, SampleEncoding, SessionConfig};

pub const DEFAULT_FOLDER: &str = "recordings";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub folder: Option<PathBuf>,
    pub settings: ControllerSettings,
    pub session: SessionConfig,
}

impl FileConfig {
    /// Read `path`, or return the defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Storage folder: the flag, then the file, then `recordings`.
    pub fn resolve_folder(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.folder.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FOLDER))
    }
}

/// Session fields that can be given on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOverrides {
    pub device_index: Option<usize>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub chunk_size: Option<u32>,
    pub encoding: Option<SampleEncoding>,
}

impl SessionOverrides {
    pub fn apply(&self, base: &SessionConfig) -> SessionConfig {
        SessionConfig {
            device_index: self.device_index.unwrap_or(base.device_index),
            channel_count: self.channel_count.unwrap_or(base.channel_count),
            sample_rate: self.sample_rate.unwrap_or(base.sample_rate),
            chunk_size: self.chunk_size.or(base.chunk_size),
            encoding: self.encoding.unwrap_or(base.encoding),
        }
    }
}
