use crate::device::capability::DeviceCapability;
use crate::prelude::{SdrError, SdrResult};
use serde::{Deserialize, Serialize};

pub const SAMPLE_RATE_MIN: u32 = 225_000;
pub const SAMPLE_RATE_MAX: u32 = 3_200_000;

/// Tuning and streaming parameters currently applied to the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub center_freq: u32,
    pub sample_rate: u32,
    pub gain: f32,
    pub agc_enabled: bool,
    pub bias_tee_power: bool,
    pub direct_sampling: bool,
    /// Raw bytes per transfer block (two bytes per IQ sample).
    pub buffer_size: usize,
    /// Depth of the pull queue.
    pub buffer_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            center_freq: 100_000_000,
            sample_rate: 2_048_000,
            gain: 20.0,
            agc_enabled: false,
            bias_tee_power: false,
            direct_sampling: false,
            buffer_size: 262_144,
            buffer_count: 16,
        }
    }
}

impl RuntimeConfig {
    /// Samples carried by one buffer of `buffer_size` raw bytes.
    pub fn samples_per_buffer(&self) -> usize {
        self.buffer_size / 2
    }

    /// Checks every field against `capability` and returns the config as it
    /// would be applied, with the gain snapped to a supported step.
    pub fn validated(&self, capability: &DeviceCapability) -> SdrResult<Self> {
        check_frequency(capability, self.center_freq)?;
        check_sample_rate(self.sample_rate)?;
        let gain = snap_gain(capability, self.gain)?;
        if self.bias_tee_power {
            check_bias_tee(capability)?;
        }
        if self.direct_sampling {
            check_direct_sampling(capability)?;
        }
        check_buffers(self.buffer_size, self.buffer_count)?;

        Ok(Self {
            gain,
            ..self.clone()
        })
    }
}

pub fn check_frequency(capability: &DeviceCapability, hz: u32) -> SdrResult<()> {
    if capability.contains_frequency(hz) {
        Ok(())
    } else {
        Err(SdrError::InvalidParameter(format!(
            "frequency {hz} Hz out of range ({} - {} Hz)",
            capability.freq_min, capability.freq_max
        )))
    }
}

pub fn check_sample_rate(hz: u32) -> SdrResult<()> {
    if (SAMPLE_RATE_MIN..=SAMPLE_RATE_MAX).contains(&hz) {
        Ok(())
    } else {
        Err(SdrError::InvalidParameter(format!(
            "sample rate {hz} Hz outside {SAMPLE_RATE_MIN} - {SAMPLE_RATE_MAX} Hz"
        )))
    }
}

pub fn snap_gain(capability: &DeviceCapability, db: f32) -> SdrResult<f32> {
    if !db.is_finite() {
        return Err(SdrError::InvalidParameter(format!("gain {db} dB is not finite")));
    }
    capability
        .nearest_gain(db)
        .ok_or_else(|| SdrError::InvalidParameter("tuner reports no gain steps".into()))
}

pub fn check_bias_tee(capability: &DeviceCapability) -> SdrResult<()> {
    if capability.supports_bias_tee {
        Ok(())
    } else {
        Err(SdrError::NotSupported(format!(
            "{} has no bias tee",
            capability.display_name
        )))
    }
}

pub fn check_direct_sampling(capability: &DeviceCapability) -> SdrResult<()> {
    if capability.supports_direct_sampling {
        Ok(())
    } else {
        Err(SdrError::NotSupported(format!(
            "{} has no direct sampling mode",
            capability.display_name
        )))
    }
}

pub fn check_buffers(buffer_size: usize, buffer_count: usize) -> SdrResult<()> {
    if buffer_size == 0 || buffer_size % 2 != 0 {
        return Err(SdrError::InvalidParameter(format!(
            "buffer size {buffer_size} must be a non-zero even byte count"
        )));
    }
    if buffer_count == 0 {
        return Err(SdrError::InvalidParameter("buffer count must be non-zero".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capability::{r820t_profile, DeviceCapability};

    fn capability(bias_tee: bool) -> DeviceCapability {
        let profile = r820t_profile("test");
        DeviceCapability {
            vendor_id: 0x0bda,
            product_id: 0x2838,
            display_name: profile.display_name,
            manufacturer: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
            serial_number: "00000001".into(),
            tuner_type: profile.tuner_type,
            freq_min: profile.freq_min,
            freq_max: profile.freq_max,
            gain_values: profile.gain_values,
            supports_bias_tee: bias_tee,
            supports_direct_sampling: false,
        }
    }

    #[test]
    fn default_config_validates_with_snapped_gain() {
        let config = RuntimeConfig::default();
        let applied = config.validated(&capability(false)).unwrap();
        assert_eq!(applied.gain, 19.7);
        assert_eq!(applied.center_freq, config.center_freq);
        assert_eq!(config.samples_per_buffer(), 131_072);
    }

    #[test]
    fn validation_rejects_each_bad_field() {
        let cap = capability(false);
        let bad_freq = RuntimeConfig {
            center_freq: 10_000_000,
            ..Default::default()
        };
        assert!(matches!(bad_freq.validated(&cap), Err(SdrError::InvalidParameter(_))));

        let bad_rate = RuntimeConfig {
            sample_rate: 100_000,
            ..Default::default()
        };
        assert!(matches!(bad_rate.validated(&cap), Err(SdrError::InvalidParameter(_))));

        let bias = RuntimeConfig {
            bias_tee_power: true,
            ..Default::default()
        };
        assert!(matches!(bias.validated(&cap), Err(SdrError::NotSupported(_))));
        assert!(bias.validated(&capability(true)).is_ok());

        let odd = RuntimeConfig {
            buffer_size: 1023,
            ..Default::default()
        };
        assert!(odd.validated(&cap).is_err());

        let nan_gain = RuntimeConfig {
            gain: f32::NAN,
            ..Default::default()
        };
        assert!(nan_gain.validated(&cap).is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"center_freq": 433920000, "gain": 30.0}"#).unwrap();
        assert_eq!(config.center_freq, 433_920_000);
        assert_eq!(config.sample_rate, 2_048_000);
        assert_eq!(config.buffer_count, 16);
    }
}
