pub mod buffer_pool;
pub mod demod;
pub mod filter;
pub mod spectrum;

pub use buffer_pool::BufferPool;
pub use demod::{AudioDemodulator, DemodMode};
pub use filter::{DigitalFilter, FilterCoefficients, FilterType};
pub use spectrum::{SpectralPeak, SpectrumAnalyzer};
