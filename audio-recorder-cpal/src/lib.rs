//! # audio-recorder-cpal
//!
//! cpal backend for audio-recorder-kit.
//!
//! Provides:
//! - `CpalDeviceCatalog`: input device enumeration on the default host
//! - `CpalCaptureDriver`: input stream capture, delivering interleaved f32
//!
//! ## Platform Requirements
//! - Linux: ALSA development headers (`libasound2-dev`)
//! - macOS: Core Audio, no extra setup
//! - Windows: WASAPI, no extra setup
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_recorder_core::{ControllerSettings, DirectoryStore, SessionConfig, SessionController};
//! use audio_recorder_cpal::{CpalCaptureDriver, CpalDeviceCatalog};
//!
//! let store = Arc::new(DirectoryStore::prepare("recordings")?);
//! let controller = SessionController::new(CpalCaptureDriver::new(), store, ControllerSettings::default())
//!     .with_catalog(Arc::new(CpalDeviceCatalog::new()));
//! controller.start(SessionConfig::new(0, 1))?;
//! ```

pub mod cpal_input;
pub mod device_catalog;

pub use cpal_input::CpalCaptureDriver;
pub use device_catalog::CpalDeviceCatalog;
