use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use audio_recorder_core::{
    ControllerSettings, Device, DeviceCatalog, DirectoryStore, RecordedFile, RecorderError, RecordingStore,
    SessionConfig, SessionController,
};
use audio_recorder_cpal::{CpalCaptureDriver, CpalDeviceCatalog};

use crate::console_observer::ConsoleObserver;

type Controller = SessionController<CpalCaptureDriver>;

/// How often `record` checks whether the session ended on its own.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Options shared by every command.
pub struct AppContext {
    pub folder: PathBuf,
    pub settings: ControllerSettings,
    pub json: bool,
}

/// The fixed status line for errors a user triggers by timing, not by fault.
pub fn status_line(error: &RecorderError) -> Option<&'static str> {
    match error {
        RecorderError::AlreadyRecording => Some("Recording is already in progress"),
        RecorderError::NoActiveSession => Some("No active recording to stop"),
        _ => None,
    }
}

pub fn devices(ctx: &AppContext) -> Result<()> {
    let devices = available_devices(&CpalDeviceCatalog::new())?;

    if ctx.json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No audio input devices found");
        return Ok(());
    }
    for device in devices {
        println!(
            "{:>3}  {}  ({} input channels)",
            device.index, device.name, device.max_input_channels
        );
    }
    Ok(())
}

pub fn list(ctx: &AppContext) -> Result<()> {
    let entries = if ctx.folder.is_dir() {
        DirectoryStore::new(&ctx.folder)
            .recordings()
            .with_context(|| format!("failed to list {}", ctx.folder.display()))?
    } else {
        Vec::new()
    };

    if ctx.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No recordings in {}", ctx.folder.display());
        return Ok(());
    }
    for entry in entries {
        println!("{}  {:>10} bytes", entry.file_name, entry.size_bytes);
    }
    Ok(())
}

/// Record one session, until Enter is pressed or `duration` elapses.
pub fn record(ctx: &AppContext, config: SessionConfig, duration: Option<Duration>) -> Result<()> {
    let controller = build_controller(ctx)?;

    let session = match controller.start(config) {
        Ok(session) => session,
        Err(e) => {
            if let Some(line) = status_line(&e) {
                println!("{}", line);
            }
            return Err(e).context("could not start recording");
        }
    };
    println!("Recording started: {}", session.output_path.display());
    match duration {
        Some(d) => println!("Recording for {:.1}s, press Enter to stop early", d.as_secs_f64()),
        None => println!("Press Enter to stop"),
    }

    let enter = spawn_line_reader();
    let deadline = duration.map(|d| Instant::now() + d);
    let mut stdin_open = true;

    loop {
        if !controller.is_recording() {
            match controller.take_last_failure() {
                Some(e) => return Err(e).context("recording ended early"),
                None => bail!("recording ended early"),
            }
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                POLL_INTERVAL.min(deadline - now)
            }
            None => POLL_INTERVAL,
        };

        if !stdin_open {
            thread::sleep(wait);
            continue;
        }
        match enter.recv_timeout(wait) {
            Ok(_) => break,
            Err(RecvTimeoutError::Timeout) => {}
            // End of input with no duration means there is nothing left to wait for.
            Err(RecvTimeoutError::Disconnected) if deadline.is_none() => break,
            Err(RecvTimeoutError::Disconnected) => stdin_open = false,
        }
    }

    let file = controller.stop().context("could not stop recording")?;
    println!("Recording stopped");
    print_recorded_file(&file, ctx.json)
}

/// Interactive prompt: `start`, `stop`, `status`, `devices`, `list`, `quit`.
pub fn shell(ctx: &AppContext, config: SessionConfig) -> Result<()> {
    let controller = build_controller(ctx)?;
    println!("Commands: start, stop, status, devices, list, quit");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        if let Some(e) = controller.take_last_failure() {
            println!("Previous recording failed: {}", e);
        }

        match line.trim() {
            "" => {}
            "start" => match controller.start(config.clone()) {
                Ok(session) => println!("Recording started: {}", session.output_path.display()),
                Err(e) => report(&e),
            },
            "stop" => match controller.stop() {
                Ok(file) => {
                    println!("Recording stopped");
                    print_recorded_file(&file, ctx.json)?;
                }
                Err(e) => report(&e),
            },
            "status" => {
                println!("State: {}", controller.state().as_str());
                if let Some(session) = controller.active_session() {
                    println!("File: {}", session.output_path.display());
                }
                let diagnostics = controller.diagnostics();
                if ctx.json {
                    print_json(&diagnostics)?;
                } else {
                    println!(
                        "Callbacks: {}  captured: {}  written: {}  overruns: {}  flushes: {}",
                        diagnostics.callback_count,
                        diagnostics.samples_captured,
                        diagnostics.samples_written,
                        diagnostics.overrun_count,
                        diagnostics.flush_cycles
                    );
                }
            }
            "devices" => {
                if let Err(e) = devices(ctx) {
                    println!("Error: {:#}", e);
                }
            }
            "list" => {
                if let Err(e) = list(ctx) {
                    println!("Error: {:#}", e);
                }
            }
            "quit" | "exit" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    if controller.is_recording() {
        let file = controller.stop().context("could not stop recording")?;
        println!("Recording stopped");
        print_recorded_file(&file, ctx.json)?;
    }
    Ok(())
}

fn build_controller(ctx: &AppContext) -> Result<Controller> {
    let store = DirectoryStore::prepare(&ctx.folder)
        .with_context(|| format!("storage folder {} is not usable", ctx.folder.display()))?;
    log::info!("Recording into {}", store.root().display());

    Ok(
        SessionController::new(CpalCaptureDriver::new(), Arc::new(store), ctx.settings.clone())
            .with_catalog(Arc::new(CpalDeviceCatalog::new()))
            .with_observer(ConsoleObserver::new()),
    )
}

/// Input devices, with an unreachable audio subsystem shown as none.
fn available_devices(catalog: &dyn DeviceCatalog) -> Result<Vec<Device>, RecorderError> {
    match catalog.list_input_devices() {
        Err(RecorderError::DeviceQuery(cause)) => {
            log::warn!("Audio devices unavailable: {}", cause);
            Ok(Vec::new())
        }
        other => other,
    }
}

fn report(error: &RecorderError) {
    match status_line(error) {
        Some(line) => println!("{}", line),
        None => println!("Error: {}", error),
    }
}

/// Lines from stdin, read on a helper thread so the caller can time out.
fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Failed to spawn stdin reader: {}", e);
    }
    rx
}

fn print_recorded_file(file: &RecordedFile, json: bool) -> Result<()> {
    if json {
        return print_json(file);
    }
    println!("File:     {}", display_path(&file.path));
    println!(
        "Format:   {} ch, {} Hz, {:?}",
        file.channels, file.sample_rate, file.encoding
    );
    println!("Duration: {:.2}s ({} frames)", file.duration_secs, file.frames);
    println!("Size:     {} bytes", file.size_bytes);
    println!("SHA-256:  {}", file.checksum);
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
