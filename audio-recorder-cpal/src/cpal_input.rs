//! cpal input stream capture driver.
//!
//! A cpal `Stream` can't leave the thread that built it on every platform,
//! so each open stream lives on its own `cpal-capture` thread. `open` waits
//! for that thread to report whether the device started, `close` asks it to
//! drop the stream and joins it. A thread that missed the open timeout is
//! kept until it exits, and no new stream opens before then.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, StreamError};
use parking_lot::Mutex;

use audio_recorder_core::models::error::RecorderError;
use audio_recorder_core::traits::capture_driver::{CaptureDriver, CaptureHandlers, DriverEvent, StreamParams};

/// Capture from an input device of the default cpal host.
///
/// Samples of any integer or float format the device offers are converted
/// to interleaved f32 before they reach the chunk callback.
pub struct CpalCaptureDriver {
    capture: Mutex<Option<CaptureThread>>,
    /// Capture thread whose open timed out and hasn't exited yet.
    timed_out: Mutex<Option<thread::JoinHandle<()>>>,
}

/// The thread that owns one open stream.
struct CaptureThread {
    /// Gate checked by the stream callbacks; cleared before the stream is dropped.
    active: Arc<AtomicBool>,
    shutdown_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CpalCaptureDriver {
    pub fn new() -> Self {
        Self {
            capture: Mutex::new(None),
            timed_out: Mutex::new(None),
        }
    }

    /// Join the timed-out capture thread if it has exited.
    ///
    /// Fails while it is still running, since it may yet grab the device.
    fn reap_timed_out(&self) -> Result<(), RecorderError> {
        let mut slot = self.timed_out.lock();
        match slot.take() {
            Some(handle) if !handle.is_finished() => {
                *slot = Some(handle);
                Err(RecorderError::DeviceOpen(
                    "a previous open that timed out is still releasing the device".into(),
                ))
            }
            Some(handle) => {
                if handle.join().is_err() {
                    log::warn!("Timed-out capture thread panicked");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for CpalCaptureDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDriver for CpalCaptureDriver {
    fn open(&mut self, params: &StreamParams, handlers: CaptureHandlers) -> Result<(), RecorderError> {
        if self.is_open() {
            return Err(RecorderError::DeviceOpen("capture stream already open".into()));
        }
        self.reap_timed_out()?;

        let active = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let active = Arc::clone(&active);
            let params = params.clone();
            thread::Builder::new()
                .name("cpal-capture".into())
                .spawn(move || {
                    let stream = match open_stream(&params, handlers, active) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    // Hold the stream until close() or the driver goes away.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    log::debug!("Capture stream released");
                })
                .map_err(|e| RecorderError::DeviceOpen(format!("failed to spawn capture thread: {}", e)))?
        };

        match ready_rx.recv_timeout(params.open_timeout) {
            Ok(Ok(())) => {
                *self.capture.lock() = Some(CaptureThread {
                    active,
                    shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread drops the stream as soon as it has one; the
                // next open waits for it to exit.
                active.store(false, Ordering::SeqCst);
                let _ = shutdown_tx.send(());
                *self.timed_out.lock() = Some(handle);
                log::warn!(
                    "Device {} did not open within {:?}",
                    params.device_index,
                    params.open_timeout
                );
                Err(RecorderError::DeviceOpen(format!(
                    "device {} did not open within {:?}",
                    params.device_index, params.open_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(RecorderError::DeviceOpen(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        if self.reap_timed_out().is_err() {
            log::debug!("Timed-out capture thread still running");
        }
        let Some(capture) = self.capture.lock().take() else {
            return Ok(());
        };
        capture.active.store(false, Ordering::SeqCst);
        let _ = capture.shutdown_tx.send(());
        capture
            .handle
            .join()
            .map_err(|_| RecorderError::StreamFault("capture thread panicked".into()))?;
        log::info!("Capture stream closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.capture.lock().is_some()
    }
}

impl Drop for CpalCaptureDriver {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close capture stream: {}", e);
        }
    }
}

/// Find the device by host index, configure it, and start the stream.
///
/// Runs on the capture thread.
fn open_stream(
    params: &StreamParams,
    handlers: CaptureHandlers,
    active: Arc<AtomicBool>,
) -> Result<Stream, RecorderError> {
    let host = cpal::default_host();
    let device = host
        .devices()
        .map_err(|e| RecorderError::DeviceOpen(format!("failed to enumerate devices: {}", e)))?
        .nth(params.device_index)
        .ok_or_else(|| RecorderError::DeviceOpen(format!("no audio device at index {}", params.device_index)))?;
    let name = device
        .name()
        .unwrap_or_else(|_| format!("Device {}", params.device_index));

    let ranges: Vec<ConfigRange> = device
        .supported_input_configs()
        .map_err(|e| RecorderError::DeviceOpen(format!("'{}' has no input configurations: {}", name, e)))?
        .map(|c| ConfigRange {
            channels: c.channels(),
            min_rate: c.min_sample_rate().0,
            max_rate: c.max_sample_rate().0,
            format: c.sample_format(),
        })
        .collect();

    let format = choose_sample_format(&ranges, params.channel_count, params.sample_rate).ok_or_else(|| {
        RecorderError::DeviceOpen(format!(
            "'{}' cannot capture {} channels at {} Hz",
            name, params.channel_count, params.sample_rate
        ))
    })?;

    let config = StreamConfig {
        channels: params.channel_count,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: match params.chunk_size {
            Some(frames) => BufferSize::Fixed(frames),
            None => BufferSize::Default,
        },
    };

    let stream = match format {
        SampleFormat::I8 => build_stream::<i8>(&device, &config, handlers, active),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, handlers, active),
        SampleFormat::I32 => build_stream::<i32>(&device, &config, handlers, active),
        SampleFormat::U8 => build_stream::<u8>(&device, &config, handlers, active),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, handlers, active),
        SampleFormat::U32 => build_stream::<u32>(&device, &config, handlers, active),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, handlers, active),
        SampleFormat::F64 => build_stream::<f64>(&device, &config, handlers, active),
        other => Err(RecorderError::DeviceOpen(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| RecorderError::DeviceOpen(format!("failed to start stream: {}", e)))?;

    log::info!(
        "Capturing from '{}': {} ch, {} Hz, {:?}, buffer {:?}",
        name,
        config.channels,
        config.sample_rate.0,
        format,
        config.buffer_size
    );
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    handlers: CaptureHandlers,
    active: Arc<AtomicBool>,
) -> Result<Stream, RecorderError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let CaptureHandlers { on_chunk, on_event } = handlers;
    let data_active = Arc::clone(&active);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !data_active.load(Ordering::Relaxed) {
                    return;
                }
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                on_chunk(&scratch);
            },
            move |err: StreamError| {
                if active.load(Ordering::Relaxed) {
                    on_event(classify_stream_error(&err));
                }
            },
            None,
        )
        .map_err(|e| RecorderError::DeviceOpen(format!("failed to build input stream: {}", e)))
}

/// One supported input configuration range, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ConfigRange {
    channels: u16,
    min_rate: u32,
    max_rate: u32,
    format: SampleFormat,
}

/// Pick the sample format to open the stream with.
///
/// Only ranges with exactly the requested channel count and a matching rate
/// qualify. F32 is preferred, then I16, then whatever the device lists first.
fn choose_sample_format(ranges: &[ConfigRange], channels: u16, sample_rate: u32) -> Option<SampleFormat> {
    let candidates: Vec<SampleFormat> = ranges
        .iter()
        .filter(|r| r.channels == channels && (r.min_rate..=r.max_rate).contains(&sample_rate))
        .map(|r| r.format)
        .collect();

    [SampleFormat::F32, SampleFormat::I16]
        .into_iter()
        .find(|preferred| candidates.contains(preferred))
        .or_else(|| candidates.first().copied())
}

/// Map a cpal stream error onto the driver's event kinds.
fn classify_stream_error(err: &StreamError) -> DriverEvent {
    match err {
        StreamError::BackendSpecific { err } => {
            let description = err.description.to_lowercase();
            if description.contains("xrun") || description.contains("overrun") || description.contains("overflow") {
                DriverEvent::Overrun(err.description.clone())
            } else {
                DriverEvent::Fault(err.description.clone())
            }
        }
        other => DriverEvent::Fault(other.to_string()),
    }
}
