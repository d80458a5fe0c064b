//! Device recognition and the tuner profiles that bound runtime configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunerType {
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
}

/// Static limits of one tuner family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub display_name: String,
    pub tuner_type: TunerType,
    pub freq_min: u32,
    pub freq_max: u32,
    pub gain_values: Vec<f32>,
    pub supports_bias_tee: bool,
    pub supports_direct_sampling: bool,
}

/// What a detected receiver can do. Read-only until the next detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub vendor_id: u16,
    pub product_id: u16,
    pub display_name: String,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub tuner_type: TunerType,
    pub freq_min: u32,
    pub freq_max: u32,
    pub gain_values: Vec<f32>,
    pub supports_bias_tee: bool,
    pub supports_direct_sampling: bool,
}

impl DeviceCapability {
    pub fn contains_frequency(&self, hz: u32) -> bool {
        (self.freq_min..=self.freq_max).contains(&hz)
    }

    /// Closest supported gain, or `None` when the tuner lists no gains.
    pub fn nearest_gain(&self, db: f32) -> Option<f32> {
        self.gain_values
            .iter()
            .copied()
            .min_by(|a, b| (a - db).abs().total_cmp(&(b - db).abs()))
    }
}

/// Maps a USB (vendor, product) pair to the profile of the hardware behind it.
pub trait CapabilityLookup: Send + Sync {
    fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<DeviceProfile>;
}

#[derive(Debug, Clone, Copy)]
pub struct KnownDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

const fn known(vendor_id: u16, product_id: u16, name: &'static str) -> KnownDevice {
    KnownDevice {
        vendor_id,
        product_id,
        name,
    }
}

pub const KNOWN_DEVICES: &[KnownDevice] = &[
    known(0x0bda, 0x2832, "Generic RTL2832U"),
    known(0x0bda, 0x2838, "RTL2832U+R820T2"),
    known(0x0ccd, 0x00a9, "Terratec Cinergy T Stick Black"),
    known(0x0ccd, 0x00b3, "Terratec NOXON DAB/DAB+ Stick"),
    known(0x0ccd, 0x00b4, "Terratec Deutschlandradio DAB Stick"),
    known(0x0ccd, 0x00b7, "Terratec T Stick PLUS"),
    known(0x0ccd, 0x00d3, "Terratec T Stick RC (Rev.3)"),
    known(0x0ccd, 0x00d7, "Terratec T Stick+"),
    known(0x0ccd, 0x00e0, "Terratec NOXON DAB Stick - Radio Energy"),
    known(0x1554, 0x5020, "PixelView PV-DT235U(RN)"),
    known(0x15f4, 0x0131, "HanfTek DAB+FM+DVB-T"),
    known(0x185b, 0x0620, "Compro Videomate U620F"),
    known(0x185b, 0x0650, "Compro Videomate U650F"),
    known(0x185b, 0x0680, "Compro Videomate U680F"),
    known(0x1b80, 0xd393, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd394, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd395, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd397, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd398, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd39d, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd3a4, "Twintech UT-40"),
    known(0x1b80, 0xd3a8, "GIGABYTE GT-U7300"),
    known(0x1d19, 0x1101, "Dexatek DK DVB-T Dongle (Logilink VG0002A)"),
    known(0x1d19, 0x1102, "Dexatek DK DVB-T Dongle (MSI DigiVox mini II V3.0)"),
    known(0x1d19, 0x1103, "Dexatek Technology Ltd. DK 5217 DVB-T Dongle"),
    known(0x1f4d, 0xa803, "Sweex DVB-T USB"),
    known(0x1f4d, 0xb803, "GTek T803"),
    known(0x1f4d, 0xc803, "Lifeview LV5TDeluxe"),
    known(0x1f4d, 0xd286, "MyGica TD312"),
    known(0x1f4d, 0xd803, "PROlectrix DV107669"),
];

const R820T_GAINS: [f32; 29] = [
    0.0, 0.9, 1.4, 2.7, 3.7, 7.7, 8.7, 12.5, 14.4, 15.7, 16.6, 19.7, 20.7, 22.9, 25.4, 28.0, 29.7,
    32.8, 33.8, 36.4, 37.2, 38.6, 40.2, 42.1, 43.4, 43.9, 44.5, 48.0, 49.6,
];

/// R820T limits: 24 MHz – 1.7 GHz with the usual 29 gain steps.
pub fn r820t_profile(display_name: &str) -> DeviceProfile {
    DeviceProfile {
        display_name: display_name.to_string(),
        tuner_type: TunerType::R820T,
        freq_min: 24_000_000,
        freq_max: 1_700_000_000,
        gain_values: R820T_GAINS.to_vec(),
        supports_bias_tee: false,
        supports_direct_sampling: false,
    }
}

/// Recognizes the RTL2832U family and reports the R820T profile for all of
/// them unless a per-device override is registered.
#[derive(Debug, Clone, Default)]
pub struct KnownDeviceTable {
    overrides: HashMap<(u16, u16), DeviceProfile>,
}

impl KnownDeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, vendor_id: u16, product_id: u16, profile: DeviceProfile) -> Self {
        self.overrides.insert((vendor_id, product_id), profile);
        self
    }
}

impl CapabilityLookup for KnownDeviceTable {
    fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<DeviceProfile> {
        if let Some(profile) = self.overrides.get(&(vendor_id, product_id)) {
            return Some(profile.clone());
        }
        KNOWN_DEVICES
            .iter()
            .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
            .map(|d| r820t_profile(d.name))
    }
}
