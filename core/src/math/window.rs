//! Window, rate-change and level-conversion helpers shared by the pipeline.

use crate::prelude::IqSample;
use std::f32::consts::PI;

/// Hann window `0.5·(1 - cos(2πi/(N-1)))`.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
        .collect()
}

/// Multiplies `data` by `window` over their common length.
pub fn apply_window(data: &mut [IqSample], window: &[f32]) {
    for (sample, &w) in data.iter_mut().zip(window) {
        *sample *= w;
    }
}

/// Keeps every `factor`th sample starting with the first.
pub fn decimate(input: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return input.to_vec();
    }
    input.iter().step_by(factor).copied().collect()
}

/// Linear interpolation by an integer factor; the points after the final
/// input sample are zero.
pub fn interpolate(input: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return input.to_vec();
    }

    let mut output = Vec::with_capacity(input.len() * factor);
    for (i, &current) in input.iter().enumerate() {
        output.push(current);
        match input.get(i + 1) {
            Some(&next) => output.extend(
                (1..factor).map(|j| current + (next - current) * j as f32 / factor as f32),
            ),
            None => output.extend(std::iter::repeat(0.0).take(factor - 1)),
        }
    }
    output
}

pub fn magnitude_to_db(magnitude: f32) -> f32 {
    20.0 * magnitude.log10()
}

/// Power to dBm assuming normalized impedance.
pub fn power_to_dbm(power: f32) -> f32 {
    10.0 * power.log10() + 30.0
}
