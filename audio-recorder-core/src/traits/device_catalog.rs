use crate::models::audio_models::Device;
use crate::models::error::RecorderError;

/// Enumerates the platform's audio input devices.
pub trait DeviceCatalog: Send + Sync {
    /// Input-capable devices in platform enumeration order.
    ///
    /// Never contains a device with zero input channels. Fails with
    /// `DeviceQuery` when the audio subsystem can't be reached.
    fn list_input_devices(&self) -> Result<Vec<Device>, RecorderError>;

    /// Look up one input device by its enumeration index.
    fn find_device(&self, index: usize) -> Result<Device, RecorderError> {
        self.list_input_devices()?
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| RecorderError::DeviceOpen(format!("no input device with index {}", index)))
    }
}

/// Drop devices that can't capture, keeping enumeration order.
pub fn input_devices_only(devices: impl IntoIterator<Item = Device>) -> Vec<Device> {
    devices.into_iter().filter(Device::is_input).collect()
}
