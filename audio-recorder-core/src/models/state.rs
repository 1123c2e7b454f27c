use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use super::config::SessionConfig;

/// Session controller state machine.
///
/// State transitions:
/// ```text
/// idle → starting → recording → stopping → idle
///           ↓                       ↑
///          idle (start failed)      └── fatal write error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
        }
    }
}

/// The one session a controller may have open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub config: SessionConfig,
    pub state: SessionState,
    pub output_path: PathBuf,
    pub created_at: DateTime<Local>,
}
