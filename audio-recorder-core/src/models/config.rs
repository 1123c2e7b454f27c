use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::Device;
use super::error::RecorderError;

/// Default capture sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Sample encoding written to the output file.
///
/// The FLAC encodings are the default and compress losslessly; the PCM and
/// float encodings write plain WAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    #[default]
    Flac16,
    Flac24,
    Pcm16,
    Pcm24,
    Float32,
}

impl SampleEncoding {
    /// Every extension a recording can be written with.
    pub const FILE_EXTENSIONS: [&'static str; 2] = ["flac", "wav"];

    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::Flac16 | Self::Pcm16 => 16,
            Self::Flac24 | Self::Pcm24 => 24,
            Self::Float32 => 32,
        }
    }

    pub fn is_flac(self) -> bool {
        matches!(self, Self::Flac16 | Self::Flac24)
    }

    pub fn file_extension(self) -> &'static str {
        if self.is_flac() {
            "flac"
        } else {
            "wav"
        }
    }

    /// Layout of the WAV data the writer produces. FLAC sessions spool
    /// integer PCM at the same depth before encoding.
    pub(crate) fn wav_spec(self, channels: u16, sample_rate: u32) -> hound::WavSpec {
        let sample_format = match self {
            Self::Float32 => hound::SampleFormat::Float,
            _ => hound::SampleFormat::Int,
        };
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bits_per_sample(),
            sample_format,
        }
    }
}

/// Parameters for one recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Platform enumeration index of the input device.
    pub device_index: usize,

    /// Number of interleaved channels to capture (default: 1).
    pub channel_count: u16,

    /// Capture and output sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Requested frames per driver callback, or None for the platform default.
    pub chunk_size: Option<u32>,

    /// Output sample encoding (default: 16-bit FLAC).
    pub encoding: SampleEncoding,
}

impl SessionConfig {
    pub fn new(device_index: usize, channel_count: u16) -> Self {
        Self {
            device_index,
            channel_count,
            ..Default::default()
        }
    }

    /// Checks the parts of the config that don't depend on the device.
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.sample_rate == 0 {
            return Err(RecorderError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.channel_count == 0 {
            return Err(RecorderError::InvalidConfig(
                "channel count must be at least 1".into(),
            ));
        }
        if self.chunk_size == Some(0) {
            return Err(RecorderError::InvalidConfig("chunk size must be positive".into()));
        }
        Ok(())
    }

    /// Full validation against the device the session will record from.
    pub fn validate_for(&self, device: &Device) -> Result<(), RecorderError> {
        self.validate()?;
        if device.index != self.device_index {
            return Err(RecorderError::InvalidConfig(format!(
                "device {} does not match requested index {}",
                device.index, self.device_index
            )));
        }
        if self.channel_count > device.max_input_channels {
            return Err(RecorderError::InvalidConfig(format!(
                "device '{}' supports at most {} input channels, {} requested",
                device.name, device.max_input_channels, self.channel_count
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            channel_count: 1,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: None,
            encoding: SampleEncoding::default(),
        }
    }
}

/// Tuning knobs for the session controller.
///
/// None of these affect correctness: frames that are not flushed on one
/// tick stay buffered until the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Interval between flush ticks (default: 100ms).
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,

    /// Minimum buffered chunks before a tick writes to disk (default: 1).
    pub flush_threshold_chunks: usize,

    /// Hard cap on buffered samples. None keeps everything in memory.
    pub max_buffered_samples: Option<usize>,

    /// How long to wait for the device to open before giving up (default: 5s).
    #[serde(with = "duration_millis")]
    pub open_timeout: Duration,
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.flush_interval.is_zero() {
            return Err(RecorderError::InvalidConfig("flush interval must be positive".into()));
        }
        if self.max_buffered_samples == Some(0) {
            return Err(RecorderError::InvalidConfig(
                "buffer cap must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            flush_threshold_chunks: 1,
            max_buffered_samples: None,
            open_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
