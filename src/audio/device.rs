//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// Description of an output device
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Channel counts available at 48kHz
    pub channels: Vec<u16>,
}

impl OutputDeviceInfo {
    /// Whether the device can play the mixer's 48kHz output at all
    pub fn supports_mixer_rate(&self) -> bool {
        !self.channels.is_empty()
    }
}

/// List all output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    let mut result: Vec<OutputDeviceInfo> = devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            Some(OutputDeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                channels: channels_at_mixer_rate(&device),
                name,
            })
        })
        .collect();

    result.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(a.name.cmp(&b.name)));
    result
}

/// Channel counts the device supports at 48kHz
fn channels_at_mixer_rate(device: &cpal::Device) -> Vec<u16> {
    let rate = cpal::SampleRate(SAMPLE_RATE);
    let mut channels: Vec<u16> = match device.supported_output_configs() {
        Ok(configs) => configs
            .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
            .map(|c| c.channels())
            .collect(),
        Err(_) => Vec::new(),
    };

    channels.sort();
    channels.dedup();
    channels
}

/// Find an output device by name, or the default device when `name` is `None`
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}
