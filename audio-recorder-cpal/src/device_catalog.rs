//! Audio device enumeration through the cpal default host.
//!
//! Devices are numbered by their position in the host's full device list,
//! the same numbering `CpalCaptureDriver` uses to open them. Output-only
//! devices are dropped after numbering, so indices can have gaps.

use cpal::traits::{DeviceTrait, HostTrait};

use audio_recorder_core::models::audio_models::Device;
use audio_recorder_core::models::error::RecorderError;
use audio_recorder_core::traits::device_catalog::{input_devices_only, DeviceCatalog};

/// Lists input devices of the platform's default audio host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDeviceCatalog;

impl CpalDeviceCatalog {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceCatalog for CpalDeviceCatalog {
    fn list_input_devices(&self) -> Result<Vec<Device>, RecorderError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| RecorderError::DeviceQuery(format!("failed to enumerate devices: {}", e)))?;

        let all: Vec<Device> = devices
            .enumerate()
            .map(|(index, device)| {
                let channels = device
                    .supported_input_configs()
                    .map(|configs| max_channels(configs.map(|c| c.channels())))
                    .unwrap_or(0);
                describe_device(index, device.name().ok(), channels)
            })
            .collect();

        log::debug!(
            "{} audio devices on host {:?}, {} with inputs",
            all.len(),
            host.id(),
            all.iter().filter(|d| d.is_input()).count()
        );
        Ok(input_devices_only(all))
    }
}

/// Widest channel count among a device's supported input configurations.
pub(crate) fn max_channels(channel_counts: impl IntoIterator<Item = u16>) -> u16 {
    channel_counts.into_iter().max().unwrap_or(0)
}

pub(crate) fn describe_device(index: usize, name: Option<String>, max_input_channels: u16) -> Device {
    let name = match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => format!("Device {}", index),
    };
    Device {
        index,
        name,
        max_input_channels,
    }
}
