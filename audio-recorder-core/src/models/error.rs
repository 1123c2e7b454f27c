use thiserror::Error;

/// Errors surfaced by the recorder core.
///
/// Every public operation on the session controller returns one of these
/// instead of panicking. Storage failures are fatal to the current session
/// only; the controller always ends up back in `Idle`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no active recording to stop")]
    NoActiveSession,

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to query audio devices: {0}")]
    DeviceQuery(String),

    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),

    #[error("failed to create recording file: {0}")]
    FileCreate(String),

    #[error("failed to write recording: {0}")]
    IoWrite(String),

    #[error("frame buffer overflow: more than {capacity} samples buffered")]
    BufferOverflow { capacity: usize },

    #[error("capture callback overrun: {0}")]
    CallbackOverrun(String),

    #[error("capture stream error: {0}")]
    StreamFault(String),
}

impl RecorderError {
    /// Whether this error ends the session it occurred in.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::FileCreate(_) | Self::IoWrite(_) | Self::BufferOverflow { .. }
        )
    }
}
