use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::SampleEncoding;

/// A finished recording, closed and durable on disk.
///
/// Returned by `SessionController::stop`. The file never changes after
/// this value is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Local>,
    pub channels: u16,
    pub sample_rate: u32,
    pub encoding: SampleEncoding,
    pub frames: u64,
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// SHA-256 hex digest of the complete file.
    pub checksum: String,
}

/// A recording found in the storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}
