use crate::device::capability::DeviceCapability;
use crate::prelude::SdrResult;
use log::debug;

/// Register-level control of the tuner and demodulator chip.
pub trait Tuner: Send {
    fn initialize(&mut self, capability: &DeviceCapability) -> SdrResult<()>;
    fn set_frequency(&mut self, hz: u32) -> SdrResult<()>;
    fn set_sample_rate(&mut self, hz: u32) -> SdrResult<()>;
    fn set_gain(&mut self, db: f32) -> SdrResult<()>;
    fn set_agc(&mut self, enabled: bool) -> SdrResult<()>;
    fn set_bias_tee(&mut self, enabled: bool) -> SdrResult<()>;
    fn set_direct_sampling(&mut self, enabled: bool) -> SdrResult<()>;
}

/// Last values written through a [`LoggingTuner`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunerRegisters {
    pub frequency: Option<u32>,
    pub sample_rate: Option<u32>,
    pub gain: Option<f32>,
    pub agc: bool,
    pub bias_tee: bool,
    pub direct_sampling: bool,
}

/// Tuner that accepts every setting and only logs it; register programming
/// for the individual tuner chips is not implemented.
#[derive(Debug, Default)]
pub struct LoggingTuner {
    registers: TunerRegisters,
}

impl LoggingTuner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registers(&self) -> &TunerRegisters {
        &self.registers
    }
}

impl Tuner for LoggingTuner {
    fn initialize(&mut self, capability: &DeviceCapability) -> SdrResult<()> {
        debug!("initializing {:?} tuner", capability.tuner_type);
        self.registers = TunerRegisters::default();
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> SdrResult<()> {
        debug!("setting tuner frequency to {hz} Hz");
        self.registers.frequency = Some(hz);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> SdrResult<()> {
        debug!("setting sample rate to {hz} Hz");
        self.registers.sample_rate = Some(hz);
        Ok(())
    }

    fn set_gain(&mut self, db: f32) -> SdrResult<()> {
        debug!("setting tuner gain to {db:.1} dB");
        self.registers.gain = Some(db);
        Ok(())
    }

    fn set_agc(&mut self, enabled: bool) -> SdrResult<()> {
        debug!("AGC {}", if enabled { "enabled" } else { "disabled" });
        self.registers.agc = enabled;
        Ok(())
    }

    fn set_bias_tee(&mut self, enabled: bool) -> SdrResult<()> {
        debug!("bias tee {}", if enabled { "enabled" } else { "disabled" });
        self.registers.bias_tee = enabled;
        Ok(())
    }

    fn set_direct_sampling(&mut self, enabled: bool) -> SdrResult<()> {
        debug!("direct sampling {}", if enabled { "enabled" } else { "disabled" });
        self.registers.direct_sampling = enabled;
        Ok(())
    }
}
