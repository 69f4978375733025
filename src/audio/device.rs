//! Audio device acquisition
//!
//! Thin wrapper over cpal host enumeration. Acquisition failures map to
//! [`DeviceError::Unavailable`] so callers can report them immediately
//! and retry by calling `start()` again.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::DeviceError;

/// Descriptive entry for a device picker
#[derive(Debug, Clone, serde::Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// Acquire the default microphone along with its native config.
pub fn default_input() -> Result<(cpal::Device, cpal::SupportedStreamConfig), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DeviceError::Unavailable("no default input device".to_string()))?;
    let config = device
        .default_input_config()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
    Ok((device, config))
}

/// Acquire the default output device along with its native config.
pub fn default_output() -> Result<(cpal::Device, cpal::SupportedStreamConfig), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::Unavailable("no default output device".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
    Ok((device, config))
}

/// List available devices for a front-end picker.
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}
