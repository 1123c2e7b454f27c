use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::mem;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use hound::{WavReader, WavWriter};
use sha2::{Digest, Sha256};

use crate::models::audio_models::AudioChunk;
use crate::models::config::SampleEncoding;
use crate::models::error::RecorderError;
use crate::processing::sample_format;
use crate::storage::directory_store::{recording_file_name, MAX_NAME_ATTEMPTS};
use crate::traits::recording_store::{RecordingSink, RecordingStore};

/// What a closed writer reports about the file it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterSummary {
    pub file_name: String,
    pub path: PathBuf,
    pub frames: u64,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Where samples go while the session runs.
enum Target {
    /// Straight into the final WAV file.
    Wav(WavWriter<Box<dyn RecordingSink>>),
    /// Into a PCM spool next to the reserved FLAC file, encoded on close.
    Flac {
        spool: WavWriter<Box<dyn RecordingSink>>,
        spool_name: String,
        spool_path: PathBuf,
        out: Box<dyn RecordingSink>,
    },
}

/// Streaming writer for one recording.
///
/// Only the flush loop and the stopping thread touch it, never the capture
/// callback. Samples arrive as f32 and are converted to the session's
/// encoding on the way out.
///
/// ## File Layout
/// ```text
/// FLAC:  <name>.flac       reserved at create, encoded on close
///        <name>.flac.part  integer PCM spool, removed once encoded
/// WAV:   <name>.wav        RIFF header patched on close, samples in push order
/// ```
///
/// A writer dropped without `close` still finalizes, so an aborted session
/// leaves a playable partial file.
pub struct OutputWriter {
    file_name: String,
    path: PathBuf,
    channels: u16,
    encoding: SampleEncoding,
    target: Option<Target>,
    samples_written: u64,
}

impl OutputWriter {
    /// Create a fresh file in `store` named after `started_at`, with the
    /// extension of `encoding`.
    ///
    /// If the timestamped name is taken, `_1`, `_2`, … suffixes are tried.
    pub fn create(
        store: &dyn RecordingStore,
        started_at: &DateTime<Local>,
        channels: u16,
        sample_rate: u32,
        encoding: SampleEncoding,
    ) -> Result<Self, RecorderError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = recording_file_name(started_at, encoding.file_extension(), attempt);
            match store.create(&file_name) {
                Ok(sink) => {
                    return Self::open(store, file_name, sink, channels, sample_rate, encoding);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    log::warn!("Recording name {} already taken, trying next", file_name);
                }
                Err(e) => {
                    return Err(RecorderError::FileCreate(format!("{}: {}", file_name, e)));
                }
            }
        }
        Err(RecorderError::FileCreate(format!(
            "no free file name after {} attempts",
            MAX_NAME_ATTEMPTS
        )))
    }

    /// Set up the target for a file just created in `store`.
    fn open(
        store: &dyn RecordingStore,
        file_name: String,
        sink: Box<dyn RecordingSink>,
        channels: u16,
        sample_rate: u32,
        encoding: SampleEncoding,
    ) -> Result<Self, RecorderError> {
        let spec = encoding.wav_spec(channels, sample_rate);
        let target = if encoding.is_flac() {
            let spool_name = format!("{}.part", file_name);
            let spool = store
                .create(&spool_name)
                .map_err(|e| e.to_string())
                .and_then(|spool_sink| WavWriter::new(spool_sink, spec).map_err(|e| e.to_string()));
            match spool {
                Ok(spool) => Target::Flac {
                    spool,
                    spool_path: store.path_of(&spool_name),
                    spool_name,
                    out: sink,
                },
                Err(e) => {
                    remove_quietly(store, &spool_name);
                    remove_quietly(store, &file_name);
                    return Err(RecorderError::FileCreate(format!("{}: {}", spool_name, e)));
                }
            }
        } else {
            match WavWriter::new(sink, spec) {
                Ok(writer) => Target::Wav(writer),
                Err(e) => {
                    remove_quietly(store, &file_name);
                    return Err(RecorderError::FileCreate(format!("{}: {}", file_name, e)));
                }
            }
        };

        Ok(Self {
            path: store.path_of(&file_name),
            file_name,
            channels,
            encoding,
            target: Some(target),
            samples_written: 0,
        })
    }

    /// Append chunks in order.
    ///
    /// A failure here leaves the file partially written; the caller owns
    /// the decision to abandon the session.
    pub fn write(&mut self, chunks: &[AudioChunk]) -> Result<(), RecorderError> {
        let writer = match self.target.as_mut() {
            Some(Target::Wav(writer)) => writer,
            Some(Target::Flac { spool, .. }) => spool,
            None => return Err(RecorderError::IoWrite("file is not open for writing".into())),
        };

        for chunk in chunks {
            if chunk.channels() != self.channels {
                return Err(RecorderError::IoWrite(format!(
                    "chunk has {} channels, file has {}",
                    chunk.channels(),
                    self.channels
                )));
            }
            let result = match self.encoding {
                SampleEncoding::Flac16 | SampleEncoding::Pcm16 => chunk
                    .samples()
                    .iter()
                    .try_for_each(|&s| writer.write_sample(sample_format::f32_to_i16(s))),
                SampleEncoding::Flac24 | SampleEncoding::Pcm24 => chunk
                    .samples()
                    .iter()
                    .try_for_each(|&s| writer.write_sample(sample_format::f32_to_i24(s))),
                SampleEncoding::Float32 => chunk
                    .samples()
                    .iter()
                    .try_for_each(|&s| writer.write_sample(sample_format::sanitize_f32(s))),
            };
            result.map_err(|e| RecorderError::IoWrite(format!("{}: {}", self.file_name, e)))?;
            self.samples_written += chunk.len() as u64;
        }
        Ok(())
    }

    /// Finalize the file, flush it to durable storage, and checksum it.
    pub fn close(mut self) -> Result<WriterSummary, RecorderError> {
        let target = self
            .target
            .take()
            .ok_or_else(|| RecorderError::IoWrite("file is not open".into()))?;
        self.finish(target)?;

        let size_bytes = fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| RecorderError::IoWrite(format!("{}: {}", self.file_name, e)))?;
        let checksum = sha256_file(&self.path)?;

        Ok(WriterSummary {
            frames: self.frames_written(),
            file_name: mem::take(&mut self.file_name),
            path: mem::take(&mut self.path),
            size_bytes,
            checksum,
        })
    }

    /// Remove the file, and its spool, without finalizing anything.
    ///
    /// For a session that failed to start.
    pub fn discard(mut self, store: &dyn RecordingStore) {
        let spool_name = match self.target.take() {
            Some(Target::Flac { spool_name, .. }) => Some(spool_name),
            _ => None,
        };
        if let Some(spool_name) = spool_name {
            remove_quietly(store, &spool_name);
        }
        remove_quietly(store, &self.file_name);
    }

    pub fn frames_written(&self) -> u64 {
        self.samples_written / self.channels as u64
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn finish(&self, target: Target) -> Result<(), RecorderError> {
        let io_error = |e: String| RecorderError::IoWrite(format!("{}: {}", self.file_name, e));
        match target {
            Target::Wav(writer) => writer.finalize().map_err(|e| io_error(e.to_string())),
            Target::Flac {
                spool,
                spool_path,
                mut out,
                ..
            } => {
                spool.finalize().map_err(|e| io_error(e.to_string()))?;
                encode_flac(&spool_path, &mut out).map_err(io_error)?;
                out.flush().map_err(|e| io_error(e.to_string()))?;
                drop(out);
                if let Err(e) = fs::remove_file(&spool_path) {
                    log::warn!("Failed to remove spool {}: {}", spool_path.display(), e);
                }
                log::debug!("Encoded {} frames into {}", self.frames_written(), self.file_name);
                Ok(())
            }
        }
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            if let Err(e) = self.finish(target) {
                log::warn!("Failed to finalize abandoned recording: {}", e);
            }
        }
    }
}

/// Encode a finalized PCM spool as one FLAC stream into `out`.
fn encode_flac(spool_path: &Path, out: &mut Box<dyn RecordingSink>) -> Result<(), String> {
    let reader = WavReader::open(spool_path).map_err(|e| format!("spool unreadable: {}", e))?;
    let spec = reader.spec();
    let samples = reader
        .into_samples::<i32>()
        .collect::<Result<Vec<i32>, _>>()
        .map_err(|e| format!("spool unreadable: {}", e))?;

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|e| format!("invalid FLAC encoder config: {:?}", e))?;
    let source = flacenc::source::MemSource::from_samples(
        &samples,
        spec.channels as usize,
        spec.bits_per_sample as usize,
        spec.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| format!("FLAC encoding failed: {:?}", e))?;

    let mut bytes = ByteSink::new();
    stream
        .write(&mut bytes)
        .map_err(|e| format!("FLAC encoding failed: {:?}", e))?;
    out.write_all(bytes.as_slice()).map_err(|e| e.to_string())
}

fn remove_quietly(store: &dyn RecordingStore, file_name: &str) {
    if let Err(e) = store.remove(file_name) {
        log::warn!("Failed to remove unused file {}: {}", file_name, e);
    }
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, RecorderError> {
    let mut file = File::open(path)
        .map_err(|e| RecorderError::IoWrite(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| RecorderError::IoWrite(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
