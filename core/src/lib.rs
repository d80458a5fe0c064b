//! Signal-processing and streaming core for USB-attached RTL2832U receivers.
//!
//! Raw bulk transfers are converted into IQ buffers by the device service and
//! handed to spectrum analysis and audio demodulation stages, either pushed
//! from the acquisition thread or pulled from a bounded queue.

pub mod config;
pub mod device;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use device::SdrDeviceService;
pub use prelude::{IqSample, IqSampleBuffer, ProcessingStage, SdrError, SdrResult, StageInput, StageOutput};
