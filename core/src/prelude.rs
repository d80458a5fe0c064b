use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// One quadrature sample, I and Q each normalized to [-1, 1].
pub type IqSample = Complex32;

/// Samples produced by one acquisition cycle, tagged with the tuning they were taken at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqSampleBuffer {
    pub samples: Vec<IqSample>,
    pub sample_rate: u32,
    pub center_freq: u32,
    /// Microseconds since the stream was started.
    pub timestamp: u64,
    /// Set on the first buffer enqueued after one or more buffers were dropped.
    pub overflow: bool,
}

impl IqSampleBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Shared configuration for each processing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub fft_size: usize,
    pub sample_rate: f32,
    pub peak_threshold_db: f32,
}

/// Input payload for a processing stage.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub samples: Vec<IqSample>,
    pub center_freq: f32,
    pub timestamp: Option<u64>,
}

impl From<&IqSampleBuffer> for StageInput {
    fn from(buffer: &IqSampleBuffer) -> Self {
        Self {
            samples: buffer.samples.clone(),
            center_freq: buffer.center_freq as f32,
            timestamp: Some(buffer.timestamp),
        }
    }
}

/// Output produced by each stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub samples: Vec<f32>,
    pub metadata: StageMetadata,
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub noise_floor: Option<f32>,
    pub peak_frequencies: Vec<f32>,
    pub notes: Vec<String>,
}

/// Error taxonomy shared by the DSP components and the device service.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SdrError {
    #[error("service not initialized")]
    NotInitialized,
    #[error("not available: {0}")]
    NotAvailable(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("hardware failure: {0}")]
    Hardware(String),
}

pub type SdrResult<T> = Result<T, SdrError>;

/// Trait describing object-oriented signal-processing stages.
pub trait ProcessingStage {
    fn initialize(&mut self, config: &StageConfig) -> SdrResult<()>;
    fn execute(&mut self, input: StageInput) -> SdrResult<StageOutput>;
    fn cleanup(&mut self);
}
