use serde::{Deserialize, Serialize};

/// An audio input device, as reported by the platform at query time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Platform enumeration index; stable for the lifetime of the query.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
}

impl Device {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// One block of interleaved samples delivered by a single driver callback.
///
/// Chunks are immutable once built; the samples move from the capture
/// callback into the frame buffer and from there into the output writer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Box<[f32]>,
    channels: u16,
}

impl AudioChunk {
    /// Copies `samples` into a new chunk.
    ///
    /// # Panics
    /// Panics if `channels` is zero.
    pub fn new(samples: &[f32], channels: u16) -> Self {
        assert!(channels > 0, "audio chunk needs at least one channel");
        Self {
            samples: samples.into(),
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total interleaved samples across all channels.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of whole frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

/// Counters for debugging a capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    pub callback_count: u64,
    pub samples_captured: u64,
    pub overrun_count: u64,
    pub flush_cycles: u64,
    pub samples_written: u64,
    pub peak_buffered_chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_frames_follow_channel_count() {
        let chunk = AudioChunk::new(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2);
        assert_eq!(chunk.len(), 6);
        assert_eq!(chunk.frames(), 3);
        assert_eq!(chunk.channels(), 2);
        assert_eq!(chunk.samples()[4], 0.5);
    }

    #[test]
    fn input_device_detection() {
        let output_only = Device {
            index: 0,
            name: "HDMI".into(),
            max_input_channels: 0,
        };
        assert!(!output_only.is_input());
    }

    #[test]
    #[should_panic]
    fn zero_channel_chunk_panics() {
        AudioChunk::new(&[0.0], 0);
    }
}
