pub mod fft;
pub mod stats;
pub mod window;

pub use fft::FftProcessor;
pub use stats::StatsHelper;
