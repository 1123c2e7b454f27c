//! # audio-recorder-core
//!
//! Platform-agnostic core of the live audio recorder.
//!
//! Provides the session state machine, the frame buffer between the capture
//! callback and the disk, and the FLAC/WAV output writer. Platform backends
//! implement `CaptureDriver` and `DeviceCatalog` and plug into the generic
//! `SessionController`.
//!
//! ## Architecture
//!
//! ```text
//! audio-recorder-core (this crate)
//! ├── traits/       ← CaptureDriver, DeviceCatalog, RecordingStore, SessionObserver
//! ├── models/       ← RecorderError, SessionState, SessionConfig, Device, AudioChunk, etc.
//! ├── processing/   ← FrameBuffer, sample format conversion
//! ├── session/      ← SessionController (generic orchestrator)
//! └── storage/      ← OutputWriter, DirectoryStore
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioChunk, Device, SessionDiagnostics};
pub use models::config::{ControllerSettings, SampleEncoding, SessionConfig, DEFAULT_SAMPLE_RATE};
pub use models::error::RecorderError;
pub use models::recording_result::{RecordedFile, RecordingEntry};
pub use models::state::{RecordingSession, SessionState};
pub use processing::frame_buffer::FrameBuffer;
pub use session::controller::SessionController;
pub use storage::directory_store::DirectoryStore;
pub use storage::output_writer::{OutputWriter, WriterSummary};
pub use traits::capture_driver::{
    CaptureDriver, CaptureHandlers, ChunkCallback, DriverEvent, DriverEventCallback, StreamParams,
};
pub use traits::device_catalog::{input_devices_only, DeviceCatalog};
pub use traits::recording_store::{RecordingSink, RecordingStore};
pub use traits::session_observer::SessionObserver;
