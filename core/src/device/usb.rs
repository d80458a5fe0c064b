//! Boundary to the USB host stack, plus an in-memory host for tests and the simulator.

use crate::config::RuntimeConfig;
use crate::device::source::{SampleSource, SyntheticConfig, SyntheticSource};
use crate::prelude::{SdrError, SdrResult};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Bulk-IN endpoint the RTL2832U streams samples on.
pub const BULK_IN_ENDPOINT: u8 = 0x81;

const USB_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsbPort {
    UsbAHost,
    UsbCOtg,
}

pub const HOST_PORTS: [UsbPort; 2] = [UsbPort::UsbAHost, UsbPort::UsbCOtg];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    Connected(UsbPort),
    Disconnected(UsbPort),
}

/// What the device service needs from the USB host stack.
pub trait UsbHost: Send + Sync {
    fn ports(&self) -> &[UsbPort] {
        &HOST_PORTS
    }

    fn is_device_connected(&self, port: UsbPort) -> bool;

    fn device_info(&self, port: UsbPort) -> Option<UsbDeviceInfo>;

    /// Bounded channel of connect/disconnect transitions.
    fn subscribe(&self) -> Receiver<UsbEvent>;

    /// Opens a streaming bulk-IN pipe for the device on `port`.
    fn open_bulk_in(
        &self,
        port: UsbPort,
        endpoint: u8,
        config: &RuntimeConfig,
    ) -> SdrResult<Box<dyn SampleSource>>;
}

/// Host whose ports are plugged and unplugged programmatically; bulk pipes
/// are backed by [`SyntheticSource`].
pub struct SimulatedUsbHost {
    devices: Mutex<HashMap<UsbPort, UsbDeviceInfo>>,
    subscribers: Mutex<Vec<Sender<UsbEvent>>>,
    signal: Mutex<SyntheticConfig>,
}

impl SimulatedUsbHost {
    pub fn new(signal: SyntheticConfig) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            signal: Mutex::new(signal),
        }
    }

    pub fn attach(&self, port: UsbPort, info: UsbDeviceInfo) {
        info!(
            "simulated attach on {port:?}: VID:{:04X} PID:{:04X}",
            info.vendor_id, info.product_id
        );
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(port, info);
        }
        self.publish(UsbEvent::Connected(port));
    }

    pub fn detach(&self, port: UsbPort) {
        info!("simulated detach on {port:?}");
        if let Ok(mut devices) = self.devices.lock() {
            devices.remove(&port);
        }
        self.publish(UsbEvent::Disconnected(port));
    }

    pub fn set_signal(&self, signal: SyntheticConfig) {
        if let Ok(mut current) = self.signal.lock() {
            *current = signal;
        }
    }

    fn publish(&self, event: UsbEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // A lagging subscriber misses this event; a closed one is forgotten.
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("USB event subscriber full, dropping {event:?}");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }
}

impl fmt::Debug for SimulatedUsbHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached: Vec<UsbPort> = self
            .devices
            .lock()
            .map(|devices| devices.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("SimulatedUsbHost")
            .field("attached", &attached)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedUsbHost {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl UsbHost for SimulatedUsbHost {
    fn is_device_connected(&self, port: UsbPort) -> bool {
        self.devices
            .lock()
            .map(|devices| devices.contains_key(&port))
            .unwrap_or(false)
    }

    fn device_info(&self, port: UsbPort) -> Option<UsbDeviceInfo> {
        self.devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(&port).cloned())
    }

    fn subscribe(&self) -> Receiver<UsbEvent> {
        let (tx, rx) = channel::bounded(USB_EVENT_CAPACITY);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn open_bulk_in(
        &self,
        port: UsbPort,
        endpoint: u8,
        config: &RuntimeConfig,
    ) -> SdrResult<Box<dyn SampleSource>> {
        if endpoint != BULK_IN_ENDPOINT {
            return Err(SdrError::InvalidParameter(format!(
                "endpoint 0x{endpoint:02X} is not a bulk-IN endpoint"
            )));
        }
        if !self.is_device_connected(port) {
            return Err(SdrError::NotAvailable(format!("nothing attached to {port:?}")));
        }
        let signal = self
            .signal
            .lock()
            .map(|signal| signal.clone())
            .map_err(|_| SdrError::Hardware("simulated host state poisoned".into()))?;
        Ok(Box::new(SyntheticSource::new(signal, config.sample_rate)))
    }
}
