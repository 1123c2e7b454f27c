use std::sync::Arc;

use audio_recorder_core::{RecordedFile, RecorderError, SessionObserver, SessionState};

/// SessionObserver that reports session events on the terminal.
///
/// Stream problems arrive from the flush thread while the prompt is idle,
/// so they go to stderr immediately instead of waiting for the next command.
pub struct ConsoleObserver;

impl ConsoleObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&self, state: SessionState) {
        log::debug!("Session state: {}", state.as_str());
    }

    fn on_error(&self, error: &RecorderError) {
        if error.is_fatal_to_session() {
            eprintln!("Recording failed: {}", error);
        } else {
            eprintln!("Warning: {}", error);
        }
    }

    fn on_recording_finished(&self, file: &RecordedFile) {
        log::debug!("Finished {} (sha256 {})", file.file_name, file.checksum);
    }
}
