use std::sync::Arc;
use std::time::Duration;

use crate::models::config::SessionConfig;
use crate::models::error::RecorderError;

/// Callback invoked once per block of captured audio.
///
/// `samples` are interleaved f32 for `StreamParams::channel_count` channels.
/// Runs on the platform's capture thread, so keep it short.
pub type ChunkCallback = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

/// Callback for out-of-band stream conditions reported by the platform.
pub type DriverEventCallback = Arc<dyn Fn(DriverEvent) + Send + Sync + 'static>;

/// Non-fatal conditions a driver can report while the stream runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The capture context fell behind; some input may be missing.
    Overrun(String),
    /// Any other stream error (device unplugged, backend failure).
    Fault(String),
}

/// The callbacks handed to a driver when a stream is opened.
#[derive(Clone)]
pub struct CaptureHandlers {
    pub on_chunk: ChunkCallback,
    pub on_event: DriverEventCallback,
}

/// What the driver needs to open an input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub device_index: usize,
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Requested frames per callback, or None for the platform default.
    pub chunk_size: Option<u32>,
    /// Upper bound on how long `open` may take before failing.
    pub open_timeout: Duration,
}

impl StreamParams {
    pub fn from_config(config: &SessionConfig, open_timeout: Duration) -> Self {
        Self {
            device_index: config.device_index,
            channel_count: config.channel_count,
            sample_rate: config.sample_rate,
            chunk_size: config.chunk_size,
            open_timeout,
        }
    }
}

/// A platform audio input binding.
///
/// Implemented by:
/// - `CpalCaptureDriver` (audio-recorder-cpal)
pub trait CaptureDriver: Send + 'static {
    /// Open the device and start delivering chunks to `handlers.on_chunk`.
    ///
    /// The callback fires on a thread owned by the platform.
    fn open(&mut self, params: &StreamParams, handlers: CaptureHandlers) -> Result<(), RecorderError>;

    /// Stop the stream and release the device.
    ///
    /// Once this returns, `on_chunk` is never invoked again. Closing a
    /// driver that isn't open is a no-op.
    fn close(&mut self) -> Result<(), RecorderError>;

    /// Whether a stream is currently open.
    fn is_open(&self) -> bool;
}
