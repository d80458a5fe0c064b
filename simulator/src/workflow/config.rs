use crate::generator::profile::GeneratorConfig;
use anyhow::{ensure, Context};
use sdrcore::config::RuntimeConfig;
use sdrcore::prelude::StageConfig;
use sdrcore::processing::demod::DemodMode;
use sdrcore::processing::spectrum::{DEFAULT_AVERAGING_FACTOR, DEFAULT_PEAK_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How each pulled buffer is analysed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub peak_threshold_db: f32,
    pub averaging: bool,
    pub averaging_factor: f32,
    pub mode: DemodMode,
    pub bandwidth: f32,
    /// Buffers pulled in an offline run.
    pub buffers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            peak_threshold_db: DEFAULT_PEAK_THRESHOLD,
            averaging: true,
            averaging_factor: DEFAULT_AVERAGING_FACTOR,
            mode: DemodMode::Fm,
            bandwidth: 100_000.0,
            buffers: 16,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub device: RuntimeConfig,
    pub generator: GeneratorConfig,
    pub analysis: AnalysisConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(
        center_freq: u32,
        sample_rate: u32,
        gain: f32,
        mode: DemodMode,
        fft_size: usize,
        buffers: usize,
    ) -> Self {
        Self {
            device: RuntimeConfig {
                center_freq,
                sample_rate,
                gain,
                ..Default::default()
            },
            generator: GeneratorConfig::default(),
            analysis: AnalysisConfig {
                mode,
                fft_size,
                buffers,
                ..Default::default()
            },
        }
    }

    /// Checks what the device service cannot: that a buffer holds a full FFT frame.
    pub fn validate(&self) -> anyhow::Result<()> {
        let frame = self.analysis.fft_size.max(1).next_power_of_two();
        ensure!(
            self.device.samples_per_buffer() >= frame,
            "buffer of {} samples cannot hold an FFT frame of {frame}",
            self.device.samples_per_buffer()
        );
        ensure!(self.analysis.buffers > 0, "offline runs need at least one buffer");
        Ok(())
    }

    pub fn to_stage_config(&self) -> StageConfig {
        StageConfig {
            fft_size: self.analysis.fft_size,
            sample_rate: self.device.sample_rate as f32,
            peak_threshold_db: self.analysis.peak_threshold_db,
        }
    }
}
