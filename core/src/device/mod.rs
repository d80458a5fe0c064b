//! USB-attached receiver: recognition, tuning and the streaming pipeline.

pub mod capability;
pub mod service;
pub mod source;
pub mod stream;
pub mod tuner;
pub mod usb;

pub use capability::{CapabilityLookup, DeviceCapability, KnownDeviceTable, TunerType};
pub use service::{DeviceEvent, DeviceState, SdrDeviceService};
pub use source::{SampleSource, SyntheticConfig, SyntheticSource};
pub use stream::{convert_samples, SampleQueue};
pub use tuner::{LoggingTuner, Tuner};
pub use usb::{SimulatedUsbHost, UsbDeviceInfo, UsbEvent, UsbHost, UsbPort};
