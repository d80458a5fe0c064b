use crate::math::fft::FftProcessor;
use crate::math::stats::StatsHelper;
use crate::prelude::{
    IqSample, ProcessingStage, SdrError, SdrResult, StageConfig, StageInput, StageMetadata,
    StageOutput,
};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const NOISE_HISTORY_LEN: usize = 100;
pub const INITIAL_NOISE_FLOOR: f32 = -100.0;
pub const DEFAULT_AVERAGING_FACTOR: f32 = 0.8;
pub const DEFAULT_PEAK_THRESHOLD: f32 = 10.0;

/// A bin that stands out of the spectrum above the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    pub bin_index: usize,
    /// Offset frequency in Hz, `bin · sample_rate / (2 · fft_size)`.
    pub frequency: f32,
    pub power_db: f32,
}

/// Magnitude-spectrum analyzer with exponential averaging, a running
/// noise-floor estimate and local-maximum peak picking.
pub struct SpectrumAnalyzer {
    fft: FftProcessor,
    sample_rate: f32,
    center_freq: f32,
    averaging: bool,
    averaging_factor: f32,
    averaged: Vec<f32>,
    first_spectrum: bool,
    estimate_noise_floor: bool,
    noise_floor: f32,
    noise_history: VecDeque<f32>,
    peak_threshold: f32,
    logger: LogManager,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        let fft = FftProcessor::new(fft_size);
        let logger = LogManager::new("spectrum");
        logger.record(&format!(
            "spectrum analyzer created: FFT size={} sample rate={sample_rate:.1} Hz",
            fft.size()
        ));

        Self {
            averaged: Vec::with_capacity(fft.size() / 2),
            fft,
            sample_rate,
            center_freq: 0.0,
            averaging: false,
            averaging_factor: DEFAULT_AVERAGING_FACTOR,
            first_spectrum: true,
            estimate_noise_floor: true,
            noise_floor: INITIAL_NOISE_FLOOR,
            noise_history: VecDeque::with_capacity(NOISE_HISTORY_LEN),
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            logger,
        }
    }

    /// Transform length actually in use (the requested size rounded up).
    pub fn fft_size(&self) -> usize {
        self.fft.size()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Center frequency of the most recently analysed frame.
    pub fn center_freq(&self) -> f32 {
        self.center_freq
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    /// `factor` is clamped to [0, 1]. Disabling forgets the running average.
    pub fn set_averaging(&mut self, enable: bool, factor: f32) {
        self.averaging = enable;
        self.averaging_factor = factor.clamp(0.0, 1.0);
        if !enable {
            self.first_spectrum = true;
        }
    }

    pub fn set_noise_floor_estimation(&mut self, enable: bool) {
        self.estimate_noise_floor = enable;
    }

    /// Returns `fft_size/2` dB bins, or an empty spectrum when fewer than
    /// `fft_size` samples are supplied.
    pub fn analyze_spectrum(&mut self, samples: &[IqSample], center_freq: f32) -> Vec<f32> {
        let current = match self.fft.compute_magnitude_spectrum(samples) {
            Ok(spectrum) => spectrum,
            Err(err) => {
                self.logger.warn(&format!("spectrum skipped: {err}"));
                return Vec::new();
            }
        };
        self.center_freq = center_freq;

        let spectrum = if self.averaging {
            if self.first_spectrum {
                self.averaged = current;
                self.first_spectrum = false;
            } else {
                let alpha = self.averaging_factor;
                for (avg, new) in self.averaged.iter_mut().zip(&current) {
                    *avg = alpha * *avg + (1.0 - alpha) * new;
                }
            }
            self.averaged.clone()
        } else {
            current
        };

        if self.estimate_noise_floor {
            self.update_noise_floor(&spectrum);
        }
        spectrum
    }

    /// Strict interior local maxima exceeding `noise_floor + threshold`.
    pub fn find_peaks(&self, spectrum: &[f32], threshold: f32) -> Vec<SpectralPeak> {
        if spectrum.len() < 3 {
            return Vec::new();
        }

        let floor = self.noise_floor + threshold;
        let bin_width = self.sample_rate / (2.0 * self.fft.size() as f32);
        spectrum
            .windows(3)
            .enumerate()
            .filter(|(_, w)| w[1] > floor && w[1] > w[0] && w[1] > w[2])
            .map(|(i, w)| SpectralPeak {
                bin_index: i + 1,
                frequency: (i + 1) as f32 * bin_width,
                power_db: w[1],
            })
            .collect()
    }

    fn update_noise_floor(&mut self, spectrum: &[f32]) {
        let Some(estimate) = StatsHelper::lower_quartile(spectrum) else {
            return;
        };
        self.noise_history.push_back(estimate);
        if self.noise_history.len() > NOISE_HISTORY_LEN {
            self.noise_history.pop_front();
        }
        if let Some(mean) = StatsHelper::mean(&self.noise_history) {
            self.noise_floor = mean;
        }
    }
}

impl ProcessingStage for SpectrumAnalyzer {
    fn initialize(&mut self, config: &StageConfig) -> SdrResult<()> {
        if config.fft_size.max(1).next_power_of_two() != self.fft.size()
            || (config.sample_rate - self.sample_rate).abs() > f32::EPSILON
        {
            let (averaging, factor) = (self.averaging, self.averaging_factor);
            let estimate = self.estimate_noise_floor;
            *self = Self::new(config.fft_size, config.sample_rate);
            self.set_averaging(averaging, factor);
            self.set_noise_floor_estimation(estimate);
        }
        self.peak_threshold = config.peak_threshold_db;
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> SdrResult<StageOutput> {
        if input.samples.len() < self.fft.size() {
            return Err(SdrError::InvalidParameter(format!(
                "expected at least {} samples",
                self.fft.size()
            )));
        }

        let spectrum = self.analyze_spectrum(&input.samples, input.center_freq);
        let peaks = self.find_peaks(&spectrum, self.peak_threshold);
        let metadata = StageMetadata {
            noise_floor: Some(self.noise_floor),
            peak_frequencies: peaks.iter().map(|p| p.frequency).collect(),
            notes: vec![format!("noise floor {:.2} dB", self.noise_floor)],
        };

        Ok(StageOutput {
            samples: spectrum,
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.averaged.clear();
        self.first_spectrum = true;
        self.noise_history.clear();
        self.noise_floor = INITIAL_NOISE_FLOOR;
    }
}
