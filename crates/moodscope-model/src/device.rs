//! Device selection for the resident model context.
//!
//! Accelerator probing order is CUDA, then Metal, then CPU. A probe failure
//! is a degraded-performance path, not an error.

use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Deployment preference for model placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Probe accelerators, fall back to CPU.
    #[default]
    Auto,
    /// Skip probing entirely.
    Cpu,
}

/// Select the best available device for `preference`.
pub fn select_device(preference: DevicePreference) -> Device {
    if preference == DevicePreference::Cpu {
        tracing::info!("device preference is cpu, skipping accelerator probe");
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!("using CUDA device 0");
                return device;
            }
            Err(e) => {
                tracing::warn!("CUDA unavailable, continuing probe: {e}");
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!("using Metal device 0");
                return device;
            }
            Err(e) => {
                tracing::warn!("Metal unavailable, continuing probe: {e}");
            }
        }
    }

    tracing::info!("using CPU device");
    Device::Cpu
}

/// Stable identifier for a device, reported by health checks.
pub fn device_label(device: &Device) -> String {
    if device.is_cuda() {
        "cuda:0".to_string()
    } else if device.is_metal() {
        "metal:0".to_string()
    } else {
        "cpu".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_preference_never_probes() {
        let device = select_device(DevicePreference::Cpu);
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn auto_preference_falls_back_to_cpu_without_accelerator_features() {
        // Default build carries no cuda/metal feature, so auto lands on CPU.
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        {
            let device = select_device(DevicePreference::Auto);
            assert_eq!(device_label(&device), "cpu");
        }
    }
}
