use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

use chrono::Local;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::{AudioChunk, SessionDiagnostics};
use crate::models::config::{ControllerSettings, SessionConfig};
use crate::models::error::RecorderError;
use crate::models::recording_result::{RecordedFile, RecordingEntry};
use crate::models::state::{RecordingSession, SessionState};
use crate::processing::frame_buffer::FrameBuffer;
use crate::storage::output_writer::OutputWriter;
use crate::traits::capture_driver::{
    CaptureDriver, CaptureHandlers, ChunkCallback, DriverEvent, DriverEventCallback, StreamParams,
};
use crate::traits::device_catalog::DeviceCatalog;
use crate::traits::recording_store::RecordingStore;
use crate::traits::session_observer::SessionObserver;

/// Per-session counters, bumped from the capture and flush threads.
#[derive(Debug, Default)]
struct SessionCounters {
    callbacks: AtomicU64,
    samples_captured: AtomicU64,
    overruns: AtomicU64,
    flush_cycles: AtomicU64,
    samples_written: AtomicU64,
}

impl SessionCounters {
    fn snapshot(&self, buffer: &FrameBuffer) -> SessionDiagnostics {
        SessionDiagnostics {
            callback_count: self.callbacks.load(Ordering::Relaxed),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            overrun_count: self.overruns.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            peak_buffered_chunks: buffer.peak_buffered_chunks(),
        }
    }
}

/// Everything owned by the one open session.
struct ActiveSession {
    session: RecordingSession,
    buffer: Arc<FrameBuffer>,
    counters: Arc<SessionCounters>,
    writer: Arc<Mutex<Option<OutputWriter>>>,
    stop_tx: mpsc::Sender<()>,
    flush_handle: Option<thread::JoinHandle<Option<RecorderError>>>,
}

impl ActiveSession {
    fn diagnostics(&self) -> SessionDiagnostics {
        self.counters.snapshot(&self.buffer)
    }
}

/// Mutable controller state, protected by `parking_lot::Mutex`.
struct Shared {
    state: SessionState,
    active: Option<ActiveSession>,
    last_failure: Option<RecorderError>,
    last_diagnostics: SessionDiagnostics,
}

struct Inner<D: CaptureDriver> {
    settings: ControllerSettings,
    store: Arc<dyn RecordingStore>,
    driver: Mutex<D>,
    catalog: Mutex<Option<Arc<dyn DeviceCatalog>>>,
    observer: Mutex<Option<Arc<dyn SessionObserver>>>,
    shared: Mutex<Shared>,
}

/// Owns the recording lifecycle: at most one session, start/stop, flushing.
///
/// Data flow for one session:
/// ```text
/// [CaptureDriver callback] → [FrameBuffer] → (flush thread, every tick) → [OutputWriter] → file
/// ```
///
/// All operations take `&self`; share the controller behind an `Arc` when
/// several request handlers need it. Overlapping calls are rejected by the
/// state machine, never queued.
pub struct SessionController<D: CaptureDriver> {
    inner: Arc<Inner<D>>,
}

impl<D: CaptureDriver> SessionController<D> {
    pub fn new(driver: D, store: Arc<dyn RecordingStore>, settings: ControllerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                driver: Mutex::new(driver),
                catalog: Mutex::new(None),
                observer: Mutex::new(None),
                shared: Mutex::new(Shared {
                    state: SessionState::Idle,
                    active: None,
                    last_failure: None,
                    last_diagnostics: SessionDiagnostics::default(),
                }),
            }),
        }
    }

    /// Validate channel counts against this catalog on `start`.
    pub fn with_catalog(self, catalog: Arc<dyn DeviceCatalog>) -> Self {
        self.set_catalog(catalog);
        self
    }

    pub fn with_observer(self, observer: Arc<dyn SessionObserver>) -> Self {
        self.set_observer(observer);
        self
    }

    pub fn set_catalog(&self, catalog: Arc<dyn DeviceCatalog>) {
        *self.inner.catalog.lock() = Some(catalog);
    }

    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        *self.inner.observer.lock() = Some(observer);
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    /// The open session, if any, with its current state.
    pub fn active_session(&self) -> Option<RecordingSession> {
        let shared = self.inner.shared.lock();
        shared.active.as_ref().map(|a| RecordingSession {
            state: shared.state,
            ..a.session.clone()
        })
    }

    /// Counters for the open session, or the last finished one.
    pub fn diagnostics(&self) -> SessionDiagnostics {
        let shared = self.inner.shared.lock();
        match &shared.active {
            Some(active) => active.diagnostics(),
            None => shared.last_diagnostics.clone(),
        }
    }

    /// The error that ended the last session on its own, if any.
    ///
    /// Set when the flush thread hits a fatal error and tears the session
    /// down without a `stop` call. Cleared by reading it.
    pub fn take_last_failure(&self) -> Option<RecorderError> {
        self.inner.shared.lock().last_failure.take()
    }

    /// Finished recordings in the storage directory.
    pub fn recordings(&self) -> io::Result<Vec<RecordingEntry>> {
        self.inner.store.recordings()
    }

    /// Begin recording. Transitions: idle → starting → recording.
    ///
    /// On failure the controller is back in `Idle` and no file is left behind.
    pub fn start(&self, config: SessionConfig) -> Result<RecordingSession, RecorderError> {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.is_idle() {
                log::debug!("Start rejected: controller is {}", shared.state.as_str());
                return Err(RecorderError::AlreadyRecording);
            }
            shared.state = SessionState::Starting;
            shared.last_failure = None;
        }
        self.inner.notify_state(SessionState::Starting);

        match Inner::open_session(&self.inner, config) {
            Ok(session) => Ok(session),
            Err(e) => {
                log::warn!("Failed to start recording: {}", e);
                self.inner.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Stop recording and finalize the file.
    /// Transitions: recording → stopping → idle.
    ///
    /// Blocks until the last samples are on disk and the device is released.
    pub fn stop(&self) -> Result<RecordedFile, RecorderError> {
        let active = {
            let mut shared = self.inner.shared.lock();
            if !shared.state.is_recording() {
                return Err(RecorderError::NoActiveSession);
            }
            match shared.active.take() {
                Some(active) => {
                    shared.state = SessionState::Stopping;
                    active
                }
                None => {
                    shared.state = SessionState::Idle;
                    return Err(RecorderError::NoActiveSession);
                }
            }
        };
        self.inner.notify_state(SessionState::Stopping);

        let result = self.inner.finish_session(active);

        if let Err(ref e) = result {
            log::error!("Recording stopped with error: {}", e);
            self.inner.notify_error(e);
        }
        self.inner.set_state(SessionState::Idle);

        if let Ok(ref file) = result {
            log::info!(
                "Recording stopped: {} ({} frames, {:.2}s)",
                file.path.display(),
                file.frames,
                file.duration_secs
            );
            if let Some(observer) = self.inner.observer() {
                observer.on_recording_finished(file);
            }
        }
        result
    }
}

impl<D: CaptureDriver> Drop for SessionController<D> {
    fn drop(&mut self) {
        if self.is_recording() {
            log::warn!("Session controller dropped while recording, stopping");
            let _ = self.stop();
        }
    }
}

impl<D: CaptureDriver> Inner<D> {
    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.observer.lock().clone()
    }

    fn notify_state(&self, state: SessionState) {
        if let Some(observer) = self.observer() {
            observer.on_state_changed(state);
        }
    }

    fn notify_error(&self, error: &RecorderError) {
        if let Some(observer) = self.observer() {
            observer.on_error(error);
        }
    }

    fn set_state(&self, state: SessionState) {
        self.shared.lock().state = state;
        self.notify_state(state);
    }

    /// Validate, create the file, open the device, and spawn the flush thread.
    fn open_session(this: &Arc<Self>, config: SessionConfig) -> Result<RecordingSession, RecorderError> {
        this.settings.validate()?;
        let catalog = this.catalog.lock().clone();
        match catalog {
            Some(catalog) => {
                let device = catalog.find_device(config.device_index)?;
                config.validate_for(&device)?;
            }
            None => config.validate()?,
        }

        let created_at = Local::now();
        let writer = OutputWriter::create(
            this.store.as_ref(),
            &created_at,
            config.channel_count,
            config.sample_rate,
            config.encoding,
        )?;
        let session = RecordingSession {
            id: Uuid::new_v4(),
            config: config.clone(),
            state: SessionState::Starting,
            output_path: writer.path().to_path_buf(),
            created_at,
        };

        let buffer = Arc::new(FrameBuffer::with_capacity_limit(this.settings.max_buffered_samples));
        let counters = Arc::new(SessionCounters::default());
        let (event_tx, event_rx) = mpsc::channel();
        let handlers = capture_handlers(&config, &buffer, &counters, event_tx);
        let params = StreamParams::from_config(&config, this.settings.open_timeout);

        if let Err(e) = this.driver.lock().open(&params, handlers) {
            writer.discard(this.store.as_ref());
            return Err(e);
        }

        let writer = Arc::new(Mutex::new(Some(writer)));
        let (stop_tx, stop_rx) = mpsc::channel();

        // Hold the state lock across the spawn so the flush thread can't
        // escalate a failure before the session is registered.
        let mut shared = this.shared.lock();
        let spawned = {
            let inner = Arc::clone(this);
            let buffer = Arc::clone(&buffer);
            let counters = Arc::clone(&counters);
            let writer = Arc::clone(&writer);
            let session_id = session.id;
            thread::Builder::new()
                .name("recorder-flush".into())
                .spawn(move || {
                    inner.run_flush_loop(session_id, &buffer, &counters, &writer, stop_rx, event_rx)
                })
        };

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                drop(shared);
                let _ = this.driver.lock().close();
                if let Some(writer) = writer.lock().take() {
                    writer.discard(this.store.as_ref());
                }
                return Err(RecorderError::IoWrite(format!("failed to spawn flush thread: {}", e)));
            }
        };

        shared.state = SessionState::Recording;
        shared.active = Some(ActiveSession {
            session: session.clone(),
            buffer,
            counters,
            writer,
            stop_tx,
            flush_handle: Some(handle),
        });
        drop(shared);

        log::info!(
            "Recording started: {} (device {}, {} ch, {} Hz)",
            session.output_path.display(),
            config.device_index,
            config.channel_count,
            config.sample_rate
        );
        this.notify_state(SessionState::Recording);

        Ok(RecordingSession {
            state: SessionState::Recording,
            ..session
        })
    }

    /// Background flush loop for one session.
    ///
    /// Returns the error that ended it, if the session was being stopped
    /// when the error hit; otherwise fatal errors are handled here.
    fn run_flush_loop(
        &self,
        session_id: Uuid,
        buffer: &FrameBuffer,
        counters: &SessionCounters,
        writer: &Mutex<Option<OutputWriter>>,
        stop_rx: mpsc::Receiver<()>,
        event_rx: mpsc::Receiver<DriverEvent>,
    ) -> Option<RecorderError> {
        let threshold = self.settings.flush_threshold_chunks.max(1);
        loop {
            let tick = stop_rx.recv_timeout(self.settings.flush_interval);
            self.report_driver_events(&event_rx);
            match tick {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    // Final drain requested by stop().
                    return Self::flush(buffer, counters, writer).err();
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let result = match buffer.take_overflow() {
                Some(overflow) => Err(overflow),
                None if buffer.len() >= threshold => Self::flush(buffer, counters, writer),
                None => Ok(()),
            };

            if let Err(e) = result {
                log::error!("Recording failed: {}", e);
                return if self.abort_session(session_id, e.clone()) {
                    None
                } else {
                    Some(e)
                };
            }
        }
    }

    /// Log and forward the stream conditions the capture side queued.
    fn report_driver_events(&self, event_rx: &mpsc::Receiver<DriverEvent>) {
        for event in event_rx.try_iter() {
            let error = match event {
                DriverEvent::Overrun(detail) => {
                    log::warn!("Capture callback overrun: {}", detail);
                    RecorderError::CallbackOverrun(detail)
                }
                DriverEvent::Fault(detail) => {
                    log::error!("Capture stream error: {}", detail);
                    RecorderError::StreamFault(detail)
                }
            };
            self.notify_error(&error);
        }
    }

    /// Move everything buffered into the file.
    fn flush(
        buffer: &FrameBuffer,
        counters: &SessionCounters,
        writer: &Mutex<Option<OutputWriter>>,
    ) -> Result<(), RecorderError> {
        let chunks = buffer.drain_all();
        if chunks.is_empty() {
            return Ok(());
        }
        let samples: usize = chunks.iter().map(AudioChunk::len).sum();

        let mut guard = writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| RecorderError::IoWrite("file writer not available".into()))?;
        writer.write(&chunks)?;

        counters.flush_cycles.fetch_add(1, Ordering::Relaxed);
        counters
            .samples_written
            .fetch_add(samples as u64, Ordering::Relaxed);
        log::debug!("Flushed {} chunks ({} samples)", chunks.len(), samples);
        Ok(())
    }

    /// Tear down a session after a fatal error on the flush thread.
    ///
    /// Returns false if `stop` already owns the teardown, in which case the
    /// error is handed back to it instead.
    fn abort_session(&self, session_id: Uuid, error: RecorderError) -> bool {
        let active = {
            let mut shared = self.shared.lock();
            let owns = shared.state.is_recording()
                && shared
                    .active
                    .as_ref()
                    .map_or(false, |a| a.session.id == session_id);
            if !owns {
                return false;
            }
            shared.state = SessionState::Stopping;
            shared.active.take()
        };
        self.notify_state(SessionState::Stopping);

        let Some(mut active) = active else {
            return false;
        };
        // This thread is the flush thread; detach rather than join itself.
        active.flush_handle.take();

        if let Err(e) = self.driver.lock().close() {
            log::warn!("Failed to close capture device: {}", e);
        }
        // Dropping the writer finalizes what it can; the partial file stays.
        drop(active.writer.lock().take());

        {
            let mut shared = self.shared.lock();
            shared.last_diagnostics = active.diagnostics();
            shared.last_failure = Some(error.clone());
            shared.state = SessionState::Idle;
        }
        log::error!(
            "Recording aborted, partial file kept: {}",
            active.session.output_path.display()
        );
        self.notify_error(&error);
        self.notify_state(SessionState::Idle);
        true
    }

    /// The stop sequence. Always releases the device and the file, and
    /// reports the first error encountered.
    fn finish_session(&self, mut active: ActiveSession) -> Result<RecordedFile, RecorderError> {
        let mut first_error: Option<RecorderError> = None;

        // Let the flush loop do its final drain, then wait for it.
        let _ = active.stop_tx.send(());
        if let Some(handle) = active.flush_handle.take() {
            match handle.join() {
                Ok(Some(e)) => first_error = Some(e),
                Ok(None) => {}
                Err(_) => {
                    first_error = Some(RecorderError::IoWrite("flush thread panicked".into()));
                }
            }
        }

        if let Err(e) = self.driver.lock().close() {
            log::warn!("Failed to close capture device: {}", e);
            self.notify_error(&e);
        }

        // Catch anything pushed between the last flush and the stream halting.
        if first_error.is_none() {
            first_error = active.buffer.take_overflow();
        }
        if first_error.is_none() {
            if let Err(e) = Self::flush(&active.buffer, &active.counters, &active.writer) {
                first_error = Some(e);
            }
        }

        let diagnostics = active.diagnostics();
        self.shared.lock().last_diagnostics = diagnostics;

        let writer = active.writer.lock().take();
        if let Some(e) = first_error {
            drop(writer);
            return Err(e);
        }
        let writer = writer.ok_or_else(|| RecorderError::IoWrite("file writer not available".into()))?;
        let summary = writer.close()?;

        let config = &active.session.config;
        Ok(RecordedFile {
            path: summary.path,
            file_name: summary.file_name,
            session_id: active.session.id,
            created_at: active.session.created_at,
            channels: config.channel_count,
            sample_rate: config.sample_rate,
            encoding: config.encoding,
            frames: summary.frames,
            duration_secs: summary.frames as f64 / config.sample_rate as f64,
            size_bytes: summary.size_bytes,
            checksum: summary.checksum,
        })
    }

}

/// Callbacks the driver runs on the capture thread. They only copy, push,
/// count, and queue; logging and observers run on the flush thread.
fn capture_handlers(
    config: &SessionConfig,
    buffer: &Arc<FrameBuffer>,
    counters: &Arc<SessionCounters>,
    event_tx: mpsc::Sender<DriverEvent>,
) -> CaptureHandlers {
    let on_chunk: ChunkCallback = {
        let buffer = Arc::clone(buffer);
        let counters = Arc::clone(counters);
        let channels = config.channel_count;
        Arc::new(move |samples: &[f32]| {
            counters.callbacks.fetch_add(1, Ordering::Relaxed);
            if samples.is_empty() {
                return;
            }
            counters
                .samples_captured
                .fetch_add(samples.len() as u64, Ordering::Relaxed);
            // A refused push latches the overflow; the flush thread reports it.
            let _ = buffer.push(AudioChunk::new(samples, channels));
        })
    };

    let on_event: DriverEventCallback = {
        let counters = Arc::clone(counters);
        Arc::new(move |event: DriverEvent| {
            if matches!(event, DriverEvent::Overrun(_)) {
                counters.overruns.fetch_add(1, Ordering::Relaxed);
            }
            // Only fails once the flush thread is gone, when nobody is listening.
            let _ = event_tx.send(event);
        })
    };

    CaptureHandlers { on_chunk, on_event }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::models::audio_models::Device;
    use crate::models::config::SampleEncoding;
    use crate::processing::sample_format::f32_to_i16;
    use crate::storage::directory_store::DirectoryStore;
    use crate::traits::device_catalog::input_devices_only;
    use crate::traits::recording_store::RecordingSink;

    /// Driver whose chunks are pushed by the test itself.
    #[derive(Clone, Default)]
    struct ManualDriver {
        handlers: Arc<Mutex<Option<CaptureHandlers>>>,
        fail_next_open: Arc<AtomicBool>,
        opens: Arc<AtomicUsize>,
    }

    impl ManualDriver {
        /// Deliver one block, as the platform callback would. Returns false
        /// if the stream is closed.
        fn emit(&self, samples: &[f32]) -> bool {
            let guard = self.handlers.lock();
            match guard.as_ref() {
                Some(handlers) => {
                    (handlers.on_chunk)(samples);
                    true
                }
                None => false,
            }
        }

        fn report(&self, event: DriverEvent) {
            if let Some(handlers) = self.handlers.lock().as_ref() {
                (handlers.on_event)(event);
            }
        }
    }

    impl CaptureDriver for ManualDriver {
        fn open(&mut self, _params: &StreamParams, handlers: CaptureHandlers) -> Result<(), RecorderError> {
            if self.fail_next_open.swap(false, Ordering::SeqCst) {
                return Err(RecorderError::DeviceOpen("device busy".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.handlers.lock() = Some(handlers);
            Ok(())
        }

        fn close(&mut self) -> Result<(), RecorderError> {
            self.handlers.lock().take();
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.handlers.lock().is_some()
        }
    }

    struct FixedCatalog(Vec<Device>);

    impl DeviceCatalog for FixedCatalog {
        fn list_input_devices(&self) -> Result<Vec<Device>, RecorderError> {
            Ok(input_devices_only(self.0.clone()))
        }
    }

    /// Sink that starts failing once `remaining` bytes have been written.
    struct FailingSink {
        inner: Box<dyn RecordingSink>,
        remaining: u64,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() as u64 > self.remaining {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            self.remaining -= buf.len() as u64;
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FailingSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Directory store whose next file runs out of space after a few bytes.
    struct FailingStore {
        inner: DirectoryStore,
        fail_next_after: Mutex<Option<u64>>,
    }

    impl RecordingStore for FailingStore {
        fn create(&self, file_name: &str) -> io::Result<Box<dyn RecordingSink>> {
            let sink = self.inner.create(file_name)?;
            match self.fail_next_after.lock().take() {
                Some(remaining) => Ok(Box::new(FailingSink { inner: sink, remaining })),
                None => Ok(sink),
            }
        }

        fn remove(&self, file_name: &str) -> io::Result<()> {
            self.inner.remove(file_name)
        }

        fn list(&self, suffix: &str) -> io::Result<Vec<RecordingEntry>> {
            self.inner.list(suffix)
        }

        fn path_of(&self, file_name: &str) -> PathBuf {
            self.inner.path_of(file_name)
        }
    }

    #[derive(Default)]
    struct CollectingObserver {
        states: Mutex<Vec<SessionState>>,
        errors: Mutex<Vec<RecorderError>>,
        finished: Mutex<Vec<RecordedFile>>,
    }

    impl SessionObserver for CollectingObserver {
        fn on_state_changed(&self, state: SessionState) {
            self.states.lock().push(state);
        }

        fn on_error(&self, error: &RecorderError) {
            self.errors.lock().push(error.clone());
        }

        fn on_recording_finished(&self, file: &RecordedFile) {
            self.finished.lock().push(file.clone());
        }
    }

    fn settings(flush_ms: u64) -> ControllerSettings {
        ControllerSettings {
            flush_interval: Duration::from_millis(flush_ms),
            ..Default::default()
        }
    }

    fn controller(dir: &Path, settings: ControllerSettings) -> (SessionController<ManualDriver>, ManualDriver) {
        let driver = ManualDriver::default();
        let store = Arc::new(DirectoryStore::new(dir));
        (SessionController::new(driver.clone(), store, settings), driver)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Channels, sample rate, and 16-bit samples of a FLAC or WAV recording.
    fn read_recording(path: &Path) -> (u16, u32, Vec<i16>) {
        if path.extension().map_or(false, |ext| ext == "flac") {
            let mut reader = claxon::FlacReader::open(path).unwrap();
            let info = reader.streaminfo();
            assert_eq!(info.bits_per_sample, 16);
            let samples = reader.samples().map(|s| s.unwrap() as i16).collect();
            (info.channels as u16, info.sample_rate, samples)
        } else {
            let mut reader = hound::WavReader::open(path).unwrap();
            let spec = reader.spec();
            let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
            (spec.channels, spec.sample_rate, samples)
        }
    }

    fn quantized(chunks: &[Vec<f32>]) -> Vec<i16> {
        chunks.iter().flatten().map(|&s| f32_to_i16(s)).collect()
    }

    #[test]
    fn three_chunks_with_one_flush_in_between() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(
            dir.path(),
            ControllerSettings {
                flush_interval: Duration::from_millis(10),
                flush_threshold_chunks: 2,
                ..Default::default()
            },
        );
        let controller = controller.with_catalog(Arc::new(FixedCatalog(vec![
            Device { index: 0, name: "Speakers".into(), max_input_channels: 0 },
            Device { index: 1, name: "Line In".into(), max_input_channels: 2 },
            Device { index: 2, name: "USB Mic".into(), max_input_channels: 1 },
        ])));

        let session = controller
            .start(SessionConfig {
                device_index: 2,
                channel_count: 1,
                sample_rate: 44_100,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.state, SessionState::Recording);

        let chunks: Vec<Vec<f32>> = (0..3)
            .map(|c| (0..512).map(|i| ((c * 512 + i) % 200) as f32 / 400.0).collect())
            .collect();

        assert!(driver.emit(&chunks[0]));
        assert!(driver.emit(&chunks[1]));
        wait_until(|| controller.diagnostics().flush_cycles == 1);
        assert!(driver.emit(&chunks[2]));

        let file = controller.stop().unwrap();
        assert_eq!(file.frames, 1536);
        assert_eq!(file.channels, 1);
        assert_eq!(file.sample_rate, 44_100);

        assert_eq!(file.path.extension().unwrap(), "flac");
        let (channels, sample_rate, samples) = read_recording(&file.path);
        assert_eq!(channels, 1);
        assert_eq!(sample_rate, 44_100);
        assert_eq!(samples.len(), 1536);
        assert_eq!(samples, quantized(&chunks));
    }

    #[test]
    fn written_file_matches_pushes_for_any_interval() {
        for flush_ms in [1, 25, 2_000] {
            let dir = tempfile::tempdir().unwrap();
            let (controller, driver) = controller(dir.path(), settings(flush_ms));
            controller.start(SessionConfig::new(0, 2)).unwrap();

            let chunks: Vec<Vec<f32>> = (0..20)
                .map(|c| (0..64).map(|i| ((c * 64 + i) % 100) as f32 / 200.0 - 0.25).collect())
                .collect();
            for chunk in &chunks {
                assert!(driver.emit(chunk));
                thread::sleep(Duration::from_millis(1));
            }

            let file = controller.stop().unwrap();
            assert_eq!(file.frames, 20 * 32);
            let (channels, _, samples) = read_recording(&file.path);
            assert_eq!(channels, 2);
            assert_eq!(samples, quantized(&chunks), "flush interval {}ms", flush_ms);
        }
    }

    #[test]
    fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));

        let first = controller.start(SessionConfig::default()).unwrap();
        assert_eq!(
            controller.start(SessionConfig::default()).unwrap_err(),
            RecorderError::AlreadyRecording
        );
        assert_eq!(controller.active_session().unwrap().id, first.id);

        let chunk = vec![0.1; 32];
        driver.emit(&chunk);
        let file = controller.stop().unwrap();

        assert_eq!(file.path, first.output_path);
        assert_eq!(read_recording(&file.path).2, quantized(&[chunk]));
        assert_eq!(controller.recordings().unwrap().len(), 1);
        assert_eq!(driver.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_while_idle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _driver) = controller(dir.path(), settings(10));

        assert_eq!(controller.stop().unwrap_err(), RecorderError::NoActiveSession);
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.active_session().is_none());
    }

    #[test]
    fn repeated_cycles_leave_one_file_each() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(5));

        let mut files = Vec::new();
        for cycle in 0..100 {
            controller.start(SessionConfig::default()).unwrap();
            let chunks: Vec<Vec<f32>> = (0..3)
                .map(|c| vec![(cycle * 3 + c) as f32 / 1000.0; 4])
                .collect();
            for chunk in &chunks {
                assert!(driver.emit(chunk));
            }
            let file = controller.stop().unwrap();
            assert_eq!(controller.state(), SessionState::Idle);
            assert!(!driver.is_open());
            files.push((file, chunks));
        }

        assert_eq!(controller.recordings().unwrap().len(), 100);
        for (file, chunks) in &files {
            let (_, sample_rate, samples) = read_recording(&file.path);
            assert_eq!(sample_rate, 44_100);
            assert_eq!(samples, quantized(chunks));
        }
    }

    #[test]
    fn write_failure_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailingStore {
            inner: DirectoryStore::new(dir.path()),
            fail_next_after: Mutex::new(Some(256)),
        });
        let driver = ManualDriver::default();
        let observer = Arc::new(CollectingObserver::default());
        let controller = SessionController::new(driver.clone(), store, settings(10))
            .with_observer(observer.clone());

        let wav = SessionConfig {
            encoding: SampleEncoding::Pcm16,
            ..Default::default()
        };
        let session = controller.start(wav).unwrap();
        driver.emit(&[0.2; 512]);

        wait_until(|| controller.state() == SessionState::Idle);
        assert!(matches!(controller.take_last_failure(), Some(RecorderError::IoWrite(_))));
        assert!(!driver.is_open());
        assert!(session.output_path.exists(), "partial file is kept");
        assert!(observer
            .errors
            .lock()
            .iter()
            .any(|e| matches!(e, RecorderError::IoWrite(_))));
        assert_eq!(controller.stop().unwrap_err(), RecorderError::NoActiveSession);

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.2; 16]);
        let file = controller.stop().unwrap();
        assert_eq!(file.frames, 16);
    }

    #[test]
    fn device_open_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        driver.fail_next_open.store(true, Ordering::SeqCst);

        let err = controller.start(SessionConfig::default()).unwrap_err();
        assert!(matches!(err, RecorderError::DeviceOpen(_)));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0, "no file or spool left");

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.0; 8]);
        assert_eq!(controller.stop().unwrap().frames, 8);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_file() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        controller.set_catalog(Arc::new(FixedCatalog(vec![
            Device { index: 0, name: "HDMI".into(), max_input_channels: 0 },
            Device { index: 1, name: "Mic".into(), max_input_channels: 2 },
        ])));

        let too_many = controller.start(SessionConfig::new(1, 3)).unwrap_err();
        assert!(matches!(too_many, RecorderError::InvalidConfig(_)));

        let output_only = controller.start(SessionConfig::new(0, 1)).unwrap_err();
        assert!(matches!(output_only, RecorderError::DeviceOpen(_)));

        let zero_rate = controller
            .start(SessionConfig {
                device_index: 1,
                sample_rate: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(zero_rate, RecorderError::InvalidConfig(_)));

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.recordings().unwrap().is_empty());
        assert_eq!(driver.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn buffer_overflow_on_tick_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(
            dir.path(),
            ControllerSettings {
                flush_interval: Duration::from_millis(10),
                flush_threshold_chunks: usize::MAX,
                max_buffered_samples: Some(8),
                ..Default::default()
            },
        );

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.0; 6]);
        driver.emit(&[0.0; 6]);

        wait_until(|| controller.state() == SessionState::Idle);
        assert_eq!(
            controller.take_last_failure(),
            Some(RecorderError::BufferOverflow { capacity: 8 })
        );
    }

    #[test]
    fn buffer_overflow_surfaces_from_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(
            dir.path(),
            ControllerSettings {
                flush_interval: Duration::from_secs(10),
                max_buffered_samples: Some(8),
                ..Default::default()
            },
        );

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.0; 6]);
        driver.emit(&[0.0; 6]);

        assert_eq!(
            controller.stop().unwrap_err(),
            RecorderError::BufferOverflow { capacity: 8 }
        );
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!driver.is_open());
    }

    #[test]
    fn overrun_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        let observer = Arc::new(CollectingObserver::default());
        controller.set_observer(observer.clone());

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.3; 8]);
        driver.report(DriverEvent::Overrun("input xrun".into()));
        driver.emit(&[0.3; 8]);

        assert!(controller.is_recording());
        assert_eq!(controller.diagnostics().overrun_count, 1);
        wait_until(|| !observer.errors.lock().is_empty());
        assert_eq!(
            observer.errors.lock().as_slice(),
            &[RecorderError::CallbackOverrun("input xrun".into())]
        );

        let file = controller.stop().unwrap();
        assert_eq!(file.frames, 16);
    }

    /// Observer that takes as long as a stalled terminal.
    struct SlowObserver {
        delay: Duration,
        errors: AtomicUsize,
    }

    impl SessionObserver for SlowObserver {
        fn on_state_changed(&self, _state: SessionState) {}

        fn on_error(&self, _error: &RecorderError) {
            thread::sleep(self.delay);
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_recording_finished(&self, _file: &RecordedFile) {}
    }

    #[test]
    fn capture_callbacks_never_wait_on_observer() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(5));
        let observer = Arc::new(SlowObserver {
            delay: Duration::from_millis(300),
            errors: AtomicUsize::new(0),
        });
        controller.set_observer(observer.clone());
        controller.start(SessionConfig::default()).unwrap();

        let began = Instant::now();
        driver.report(DriverEvent::Overrun("input xrun".into()));
        driver.report(DriverEvent::Fault("device unplugged".into()));
        assert!(driver.emit(&[0.1; 64]));
        assert!(
            began.elapsed() < Duration::from_millis(100),
            "capture thread blocked for {:?}",
            began.elapsed()
        );

        let file = controller.stop().unwrap();
        assert_eq!(observer.errors.load(Ordering::SeqCst), 2);
        assert_eq!(controller.diagnostics().overrun_count, 1);
        assert_eq!(file.frames, 64);
    }

    #[test]
    fn start_rejected_when_catalog_unreachable() {
        struct UnreachableCatalog;

        impl DeviceCatalog for UnreachableCatalog {
            fn list_input_devices(&self) -> Result<Vec<Device>, RecorderError> {
                Err(RecorderError::DeviceQuery("no backend".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        let controller = controller.with_catalog(Arc::new(UnreachableCatalog));

        assert_eq!(
            controller.start(SessionConfig::default()).unwrap_err(),
            RecorderError::DeviceQuery("no backend".into())
        );
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.active_session().is_none());
        assert_eq!(driver.opens.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn observer_sees_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        let observer = Arc::new(CollectingObserver::default());
        let controller = controller.with_observer(observer.clone());

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.0; 4]);
        let file = controller.stop().unwrap();

        assert_eq!(
            observer.states.lock().as_slice(),
            &[
                SessionState::Starting,
                SessionState::Recording,
                SessionState::Stopping,
                SessionState::Idle
            ]
        );
        assert_eq!(observer.finished.lock().as_slice(), &[file]);
    }

    #[test]
    fn concurrent_starts_admit_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));
        let controller = Arc::new(controller);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || controller.start(SessionConfig::default()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == RecorderError::AlreadyRecording));
        assert_eq!(driver.opens.load(Ordering::SeqCst), 1);
        controller.stop().unwrap();
    }

    #[test]
    fn no_chunks_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));

        controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.5; 10]);
        let file = controller.stop().unwrap();

        assert!(!driver.emit(&[0.5; 10]));
        assert_eq!(controller.diagnostics().samples_written, 10);
        assert_eq!(read_recording(&file.path).2.len(), 10);
    }

    #[test]
    fn dropping_while_recording_finalizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, driver) = controller(dir.path(), settings(10));

        let session = controller.start(SessionConfig::default()).unwrap();
        driver.emit(&[0.25; 12]);
        drop(controller);

        assert!(!driver.is_open());
        assert_eq!(read_recording(&session.output_path).2.len(), 12);
    }
}
