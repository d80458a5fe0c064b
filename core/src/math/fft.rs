use crate::math::window::{apply_window, hann_window, magnitude_to_db, power_to_dbm};
use crate::prelude::{IqSample, SdrError, SdrResult};
use crate::telemetry::log::LogManager;
use num_complex::Complex32;
use std::f32::consts::PI;

/// Magnitudes below this are clamped so the dB conversion stays finite.
const MIN_MAGNITUDE: f32 = 1e-12;

/// Fixed-length, Hann-windowed radix-2 FFT.
///
/// The requested length is rounded up to the next power of two; the window
/// and twiddle tables are sized to the rounded length.
pub struct FftProcessor {
    size: usize,
    window: Vec<f32>,
    twiddle: Vec<Complex32>,
    stages: u32,
}

impl FftProcessor {
    pub fn new(requested: usize) -> Self {
        let size = requested.max(1).next_power_of_two();
        let twiddle = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f32 / size as f32;
                Complex32::new(angle.cos(), angle.sin())
            })
            .collect();

        LogManager::new("fft").record(&format!("FFT processor initialized with size {size}"));

        Self {
            size,
            window: hann_window(size),
            twiddle,
            stages: size.trailing_zeros(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Windows the first `size` samples of `input` and transforms them.
    ///
    /// Fails with `InvalidParameter` when fewer than `size` samples are given.
    pub fn compute_fft(&self, input: &[IqSample]) -> SdrResult<Vec<Complex32>> {
        if input.len() < self.size {
            return Err(SdrError::InvalidParameter(format!(
                "FFT input has {} samples, need at least {}",
                input.len(),
                self.size
            )));
        }

        let mut data = input[..self.size].to_vec();
        apply_window(&mut data, &self.window);
        self.radix2(&mut data);
        Ok(data)
    }

    /// First `size/2` bins as `20·log10(|X|)`.
    pub fn compute_magnitude_spectrum(&self, input: &[IqSample]) -> SdrResult<Vec<f32>> {
        let spectrum = self.compute_fft(input)?;
        Ok(spectrum[..self.size / 2]
            .iter()
            .map(|bin| magnitude_to_db(bin.norm().max(MIN_MAGNITUDE)))
            .collect())
    }

    /// First `size/2` bins as `10·log10(|X|²/N²) + 30`.
    pub fn compute_psd(&self, input: &[IqSample]) -> SdrResult<Vec<f32>> {
        let spectrum = self.compute_fft(input)?;
        let scale = 1.0 / (self.size as f32 * self.size as f32);
        Ok(spectrum[..self.size / 2]
            .iter()
            .map(|bin| power_to_dbm((bin.norm_sqr() * scale).max(MIN_MAGNITUDE * MIN_MAGNITUDE)))
            .collect())
    }

    fn radix2(&self, data: &mut [Complex32]) {
        let n = data.len();
        if n < 2 {
            return;
        }

        for i in 0..n {
            let j = i.reverse_bits() >> (usize::BITS - self.stages);
            if j > i {
                data.swap(i, j);
            }
        }

        let mut length = 2;
        while length <= n {
            let half = length / 2;
            let step = n / length;
            for start in (0..n).step_by(length) {
                for j in 0..half {
                    let u = data[start + j];
                    let v = data[start + j + half] * self.twiddle[j * step];
                    data[start + j] = u + v;
                    data[start + j + half] = u - v;
                }
            }
            length <<= 1;
        }
    }
}
