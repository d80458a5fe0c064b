use crate::math::window::decimate;
use crate::prelude::{
    IqSample, ProcessingStage, SdrError, SdrResult, StageConfig, StageInput, StageMetadata,
    StageOutput,
};
use crate::processing::filter::{DigitalFilter, FilterType};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

pub const DEFAULT_AUDIO_RATE: f32 = 48_000.0;
pub const DEFAULT_BANDWIDTH: f32 = 15_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemodMode {
    Am,
    Fm,
    Usb,
    Lsb,
}

/// Turns IQ samples into normalized audio at roughly the audio rate.
///
/// Every mode passes the detected signal through the audio low-pass and then
/// keeps every `decimation_factor`th sample. AM and FM also keep an RF
/// channel filter sized by `set_bandwidth`; detection reads the raw IQ.
pub struct AudioDemodulator {
    mode: DemodMode,
    sample_rate: f32,
    audio_rate: f32,
    bandwidth: f32,
    decimation_factor: usize,
    audio_filter: DigitalFilter,
    rf_filter: Option<DigitalFilter>,
    logger: LogManager,
}

impl AudioDemodulator {
    pub fn new(mode: DemodMode, sample_rate: f32) -> SdrResult<Self> {
        if !(sample_rate > 0.0) {
            return Err(SdrError::InvalidParameter(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let audio_rate = DEFAULT_AUDIO_RATE;
        let bandwidth = DEFAULT_BANDWIDTH;
        let demodulator = Self {
            mode,
            sample_rate,
            audio_rate,
            bandwidth,
            decimation_factor: decimation_factor(sample_rate, audio_rate),
            audio_filter: audio_filter(sample_rate, audio_rate)?,
            rf_filter: rf_filter(mode, sample_rate, bandwidth)?,
            logger: LogManager::new("demod"),
        };

        demodulator.logger.record(&format!(
            "audio demodulator created: mode={mode:?} sr={sample_rate:.1} Hz audio_sr={audio_rate:.1} Hz decimation={}",
            demodulator.decimation_factor
        ));
        Ok(demodulator)
    }

    pub fn mode(&self) -> DemodMode {
        self.mode
    }

    pub fn decimation_factor(&self) -> usize {
        self.decimation_factor
    }

    pub fn bandwidth(&self) -> f32 {
        self.bandwidth
    }

    pub fn audio_rate(&self) -> f32 {
        self.audio_rate
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn rf_filter(&self) -> Option<&DigitalFilter> {
        self.rf_filter.as_ref()
    }

    /// Rebuilds the RF channel filter. Only AM and FM carry one.
    pub fn set_bandwidth(&mut self, bandwidth: f32) -> SdrResult<()> {
        if matches!(self.mode, DemodMode::Am | DemodMode::Fm) {
            self.rf_filter = rf_filter(self.mode, self.sample_rate, bandwidth)?;
        }
        self.bandwidth = bandwidth;
        Ok(())
    }

    pub fn set_audio_sample_rate(&mut self, audio_rate: f32) -> SdrResult<()> {
        self.audio_filter = audio_filter(self.sample_rate, audio_rate)?;
        self.audio_rate = audio_rate;
        self.decimation_factor = decimation_factor(self.sample_rate, audio_rate);
        Ok(())
    }

    pub fn demodulate(&mut self, iq: &[IqSample]) -> Vec<f32> {
        if iq.is_empty() {
            return Vec::new();
        }

        let detected: Vec<f32> = match self.mode {
            DemodMode::Am => iq.iter().map(|s| s.norm()).collect(),
            DemodMode::Fm => {
                // No reference precedes the first sample of a block.
                std::iter::once(0.0)
                    .chain(iq.windows(2).map(|pair| (pair[1] * pair[0].conj()).arg()))
                    .collect()
            }
            // Sideband selection is not performed; both take the in-phase rail.
            DemodMode::Usb | DemodMode::Lsb => iq.iter().map(|s| s.re).collect(),
        };

        let mut audio = self.audio_filter.filter_real(&detected);
        if self.mode == DemodMode::Fm {
            audio[0] = 0.0;
        }
        decimate(&audio, self.decimation_factor)
    }
}

impl ProcessingStage for AudioDemodulator {
    fn initialize(&mut self, config: &StageConfig) -> SdrResult<()> {
        if (config.sample_rate - self.sample_rate).abs() > f32::EPSILON {
            let (bandwidth, audio_rate) = (self.bandwidth, self.audio_rate);
            let mut rebuilt = Self::new(self.mode, config.sample_rate)?;
            rebuilt.set_bandwidth(bandwidth)?;
            rebuilt.set_audio_sample_rate(audio_rate)?;
            *self = rebuilt;
        }
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> SdrResult<StageOutput> {
        if input.samples.is_empty() {
            return Err(SdrError::InvalidParameter("no samples to demodulate".into()));
        }
        let audio = self.demodulate(&input.samples);
        let metadata = StageMetadata {
            notes: vec![format!("{:?} audio samples {}", self.mode, audio.len())],
            ..Default::default()
        };
        Ok(StageOutput {
            samples: audio,
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.audio_filter.reset();
        if let Some(filter) = self.rf_filter.as_mut() {
            filter.reset();
        }
    }
}

fn decimation_factor(sample_rate: f32, audio_rate: f32) -> usize {
    ((sample_rate / audio_rate) as usize).max(1)
}

fn audio_filter(sample_rate: f32, audio_rate: f32) -> SdrResult<DigitalFilter> {
    // The audio band edge can exceed Nyquist when the IQ rate is already low.
    let cutoff = (audio_rate / 2.0).min(sample_rate * 0.45);
    DigitalFilter::new(FilterType::LowPass, cutoff, sample_rate)
}

fn rf_filter(mode: DemodMode, sample_rate: f32, bandwidth: f32) -> SdrResult<Option<DigitalFilter>> {
    match mode {
        DemodMode::Am | DemodMode::Fm => Ok(Some(DigitalFilter::new(
            FilterType::LowPass,
            bandwidth.min(sample_rate * 0.45),
            sample_rate,
        )?)),
        DemodMode::Usb | DemodMode::Lsb => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;
    use std::f32::consts::PI;

    fn fm_tone(len: usize, deviation: f32) -> Vec<IqSample> {
        let mut phase = 0.0f32;
        (0..len)
            .map(|i| {
                phase += deviation * (i as f32 * 0.01).sin();
                Complex32::from_polar(0.8, phase)
            })
            .collect()
    }

    #[test]
    fn decimation_factor_tracks_sample_rate() {
        let demod = AudioDemodulator::new(DemodMode::Am, 2_048_000.0).unwrap();
        assert_eq!(demod.decimation_factor(), 42);
        let slow = AudioDemodulator::new(DemodMode::Am, 8_000.0).unwrap();
        assert_eq!(slow.decimation_factor(), 1);
    }

    #[test]
    fn fm_first_sample_is_zero_and_output_is_bounded() {
        let mut demod = AudioDemodulator::new(DemodMode::Fm, 2_048_000.0).unwrap();
        for len in [1usize, 2, 41, 42, 43, 1000, 4096] {
            let input = fm_tone(len, 0.2);
            let audio = demod.demodulate(&input);
            assert_eq!(audio[0], 0.0, "len {len}");
            assert!(audio.len() <= len.div_ceil(demod.decimation_factor()));
        }
    }

    #[test]
    fn empty_input_yields_no_audio() {
        let mut demod = AudioDemodulator::new(DemodMode::Fm, 240_000.0).unwrap();
        assert!(demod.demodulate(&[]).is_empty());
    }

    #[test]
    fn am_recovers_carrier_envelope() {
        let mut demod = AudioDemodulator::new(DemodMode::Am, 48_000.0).unwrap();
        let input: Vec<IqSample> = (0..4800)
            .map(|i| Complex32::from_polar(0.5, 2.0 * PI * 100.0 * i as f32 / 48_000.0))
            .collect();
        let audio = demod.demodulate(&input);
        assert_eq!(audio.len(), 4800);
        assert!((audio[4799] - 0.5).abs() < 0.01);
    }

    #[test]
    fn am_envelope_holds_for_offset_carrier() {
        let fs = 240_000.0;
        let mut demod = AudioDemodulator::new(DemodMode::Am, fs).unwrap();
        let input: Vec<IqSample> = (0..24_000)
            .map(|i| Complex32::from_polar(0.5, 2.0 * PI * 60_000.0 * i as f32 / fs))
            .collect();
        let audio = demod.demodulate(&input);
        assert_eq!(audio.len(), 24_000usize.div_ceil(demod.decimation_factor()));
        assert!((audio[audio.len() - 1] - 0.5).abs() < 0.01);
        assert!(demod.rf_filter().is_some());
    }

    #[test]
    fn fm_constant_frequency_gives_constant_output() {
        let mut demod = AudioDemodulator::new(DemodMode::Fm, 96_000.0).unwrap();
        let step = 0.1f32;
        let input: Vec<IqSample> = (0..2000)
            .map(|i| Complex32::from_polar(1.0, step * i as f32))
            .collect();
        let audio = demod.demodulate(&input);
        assert_eq!(demod.decimation_factor(), 2);
        assert!((audio[audio.len() - 1] - step).abs() < 0.01);
    }

    #[test]
    fn sidebands_share_the_in_phase_path() {
        let input: Vec<IqSample> = (0..960)
            .map(|i| Complex32::new((i as f32 * 0.05).cos(), (i as f32 * 0.05).sin()))
            .collect();
        let mut upper = AudioDemodulator::new(DemodMode::Usb, 96_000.0).unwrap();
        let mut lower = AudioDemodulator::new(DemodMode::Lsb, 96_000.0).unwrap();
        assert_eq!(upper.demodulate(&input), lower.demodulate(&input));
    }

    #[test]
    fn bandwidth_and_audio_rate_can_be_changed() {
        let mut demod = AudioDemodulator::new(DemodMode::Am, 2_048_000.0).unwrap();
        demod.set_bandwidth(8_000.0).unwrap();
        assert_eq!(demod.bandwidth(), 8_000.0);

        demod.set_audio_sample_rate(24_000.0).unwrap();
        assert_eq!(demod.decimation_factor(), 85);
        assert_eq!(demod.audio_rate(), 24_000.0);
    }

    #[test]
    fn stage_execute_reports_audio_length() {
        let mut demod = AudioDemodulator::new(DemodMode::Fm, 480_000.0).unwrap();
        let input = StageInput {
            samples: fm_tone(4800, 0.1),
            center_freq: 100e6,
            timestamp: Some(0),
        };
        let output = demod.execute(input).unwrap();
        assert_eq!(output.samples.len(), 480);
        assert!(output.metadata.notes[0].contains("480"));
        demod.cleanup();
    }

    #[test]
    fn stage_rate_change_keeps_channel_settings() {
        let mut demod = AudioDemodulator::new(DemodMode::Fm, 2_048_000.0).unwrap();
        demod.set_bandwidth(100_000.0).unwrap();
        demod.set_audio_sample_rate(24_000.0).unwrap();

        let config = StageConfig {
            fft_size: 1024,
            sample_rate: 1_024_000.0,
            peak_threshold_db: 10.0,
        };
        demod.initialize(&config).unwrap();
        assert_eq!(demod.sample_rate(), 1_024_000.0);
        assert_eq!(demod.bandwidth(), 100_000.0);
        assert_eq!(demod.audio_rate(), 24_000.0);
        assert_eq!(demod.decimation_factor(), 42);
    }
}
