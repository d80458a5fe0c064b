use crate::prelude::{SdrError, SdrResult};
use crate::telemetry::log::LogManager;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
    BandStop,
}

/// Transfer-function coefficients plus the Direct Form II state they drive.
///
/// `a[0]` is always 1. The delay line holds `max(len(a), len(b)) - 1` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoefficients {
    pub b: Vec<f32>,
    pub a: Vec<f32>,
    delay_line: Vec<Complex32>,
}

impl FilterCoefficients {
    fn new(b: Vec<f32>, a: Vec<f32>) -> Self {
        let taps = b.len().max(a.len()).saturating_sub(1);
        Self {
            b,
            a,
            delay_line: vec![Complex32::default(); taps],
        }
    }

    pub fn delay_line(&self) -> &[Complex32] {
        &self.delay_line
    }

    fn step(&mut self, x: Complex32) -> Complex32 {
        let mut w = x;
        for (a, state) in self.a.iter().skip(1).zip(&self.delay_line) {
            w -= *state * *a;
        }

        let mut y = w * self.b[0];
        for (b, state) in self.b.iter().skip(1).zip(&self.delay_line) {
            y += *state * *b;
        }

        if !self.delay_line.is_empty() {
            self.delay_line.rotate_right(1);
            self.delay_line[0] = w;
        }
        y
    }
}

/// Low-order IIR filter: one pole for low/high-pass, a two-pole resonator
/// for band-pass and a two-pole notch for band-stop.
pub struct DigitalFilter {
    filter_type: FilterType,
    coefficients: FilterCoefficients,
}

impl DigitalFilter {
    /// Single-cutoff constructor for `LowPass` and `HighPass`.
    pub fn new(filter_type: FilterType, cutoff: f32, sample_rate: f32) -> SdrResult<Self> {
        validate_frequency("cutoff", cutoff, sample_rate)?;

        // Bilinear one-pole design, K = tan(wc/2).
        let wc = 2.0 * PI * cutoff / sample_rate;
        let k = (wc / 2.0).tan();
        let pole = (k - 1.0) / (k + 1.0);
        let (b, a) = match filter_type {
            FilterType::LowPass => {
                let g = k / (1.0 + k);
                (vec![g, g], vec![1.0, pole])
            }
            FilterType::HighPass => {
                let g = 1.0 / (1.0 + k);
                (vec![g, -g], vec![1.0, pole])
            }
            other => {
                return Err(SdrError::InvalidParameter(format!(
                    "{other:?} needs a low and a high edge"
                )))
            }
        };

        LogManager::new("filter").record(&format!(
            "digital filter created: type={filter_type:?} cutoff={cutoff:.1} Hz sr={sample_rate:.1} Hz"
        ));

        Ok(Self {
            filter_type,
            coefficients: FilterCoefficients::new(b, a),
        })
    }

    /// Dual-cutoff constructor for `BandPass` and `BandStop`.
    pub fn band(filter_type: FilterType, low: f32, high: f32, sample_rate: f32) -> SdrResult<Self> {
        validate_frequency("low edge", low, sample_rate)?;
        validate_frequency("high edge", high, sample_rate)?;
        if low >= high {
            return Err(SdrError::InvalidParameter(format!(
                "band edges out of order: {low} >= {high}"
            )));
        }

        let center = 2.0 * PI * (low + high) / 2.0 / sample_rate;
        let bandwidth = (high - low) / sample_rate;
        let r = (1.0 - 3.0 * bandwidth).clamp(0.0, 0.9999);
        let cos_c = center.cos();
        let a = vec![1.0, -2.0 * r * cos_c, r * r];
        let k = (1.0 - 2.0 * r * cos_c + r * r) / (2.0 - 2.0 * cos_c);

        let b = match filter_type {
            FilterType::BandPass => vec![1.0 - k, 2.0 * (k - r) * cos_c, r * r - k],
            FilterType::BandStop => vec![k, -2.0 * k * cos_c, k],
            other => {
                return Err(SdrError::InvalidParameter(format!(
                    "{other:?} takes a single cutoff"
                )))
            }
        };

        LogManager::new("filter").record(&format!(
            "digital band filter created: type={filter_type:?} {low:.1} - {high:.1} Hz sr={sample_rate:.1} Hz"
        ));

        Ok(Self {
            filter_type,
            coefficients: FilterCoefficients::new(b, a),
        })
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn coefficients(&self) -> &FilterCoefficients {
        &self.coefficients
    }

    pub fn filter(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        input.iter().map(|&x| self.coefficients.step(x)).collect()
    }

    pub fn filter_real(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|&x| self.coefficients.step(Complex32::new(x, 0.0)).re)
            .collect()
    }

    /// Clears the delay line; coefficients are kept.
    pub fn reset(&mut self) {
        self.coefficients
            .delay_line
            .iter_mut()
            .for_each(|state| *state = Complex32::default());
    }
}

fn validate_frequency(name: &str, value: f32, sample_rate: f32) -> SdrResult<()> {
    if !(sample_rate > 0.0) {
        return Err(SdrError::InvalidParameter(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }
    if !(value > 0.0 && value < sample_rate / 2.0) {
        return Err(SdrError::InvalidParameter(format!(
            "{name} {value} Hz outside (0, {}) Hz",
            sample_rate / 2.0
        )));
    }
    Ok(())
}
