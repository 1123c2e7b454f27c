use crate::models::error::RecorderError;
use crate::models::recording_result::RecordedFile;
use crate::models::state::SessionState;

/// Event sink for session controller notifications.
///
/// Methods run on the thread that made the transition: the caller of
/// `start`/`stop`, or the session's flush thread for stream conditions and
/// aborts. Never on the capture thread, so blocking here delays flushing
/// but never drops audio.
pub trait SessionObserver: Send + Sync {
    /// Called after every state transition.
    fn on_state_changed(&self, state: SessionState);

    /// Called for overruns, stream faults, and fatal session errors.
    fn on_error(&self, error: &RecorderError);

    /// Called when `stop` has produced a finished file.
    fn on_recording_finished(&self, file: &RecordedFile);
}
