use anyhow::Context;
use sdrcore::device::capability::{CapabilityLookup, KnownDeviceTable};
use sdrcore::device::source::SyntheticConfig;
use sdrcore::device::usb::{SimulatedUsbHost, UsbDeviceInfo, UsbPort};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Describes the simulated dongle and the signal it receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub tone_offset_hz: f32,
    pub amplitude: f32,
    pub noise: f32,
    pub seed: u64,
    pub pace_ms: u64,
    pub port: UsbPort,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tone_offset_hz: 100_000.0,
            amplitude: 0.5,
            noise: 0.05,
            seed: 0,
            pace_ms: 10,
            port: UsbPort::UsbAHost,
            vendor_id: 0x0bda,
            product_id: 0x2838,
            manufacturer: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
            serial_number: "00000001".into(),
        }
    }
}

impl GeneratorConfig {
    pub fn synthetic(&self) -> SyntheticConfig {
        SyntheticConfig {
            tone_offset_hz: self.tone_offset_hz,
            amplitude: self.amplitude,
            noise: self.noise,
            seed: self.seed,
            pace_ms: self.pace_ms,
        }
    }

    pub fn device_info(&self) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            manufacturer: self.manufacturer.clone(),
            product: self.product.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

/// Builds a simulated host with the configured dongle plugged in.
pub fn attach_simulated_dongle(config: &GeneratorConfig) -> anyhow::Result<Arc<SimulatedUsbHost>> {
    KnownDeviceTable::new()
        .lookup(config.vendor_id, config.product_id)
        .with_context(|| {
            format!(
                "VID:{:04X} PID:{:04X} is not a supported receiver",
                config.vendor_id, config.product_id
            )
        })?;

    let host = Arc::new(SimulatedUsbHost::new(config.synthetic()));
    host.attach(config.port, config.device_info());
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrcore::device::usb::UsbHost;

    #[test]
    fn default_profile_attaches_a_known_dongle() {
        let config = GeneratorConfig::default();
        let host = attach_simulated_dongle(&config).unwrap();
        assert!(host.is_device_connected(UsbPort::UsbAHost));
        assert_eq!(host.device_info(UsbPort::UsbAHost), Some(config.device_info()));
        assert_eq!(config.synthetic().tone_offset_hz, 100_000.0);
    }

    #[test]
    fn unknown_hardware_is_rejected() {
        let config = GeneratorConfig {
            vendor_id: 0x1234,
            product_id: 0x0001,
            ..Default::default()
        };
        let Err(err) = attach_simulated_dongle(&config) else {
            panic!("unknown hardware accepted");
        };
        assert!(err.to_string().contains("1234"));
    }
}
