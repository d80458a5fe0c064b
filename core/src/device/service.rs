use crate::config::{self, RuntimeConfig};
use crate::device::capability::{CapabilityLookup, DeviceCapability, KnownDeviceTable};
use crate::device::stream::{AcquisitionContext, AcquisitionTask, DataCallback, SampleQueue};
use crate::device::tuner::{LoggingTuner, Tuner};
use crate::device::usb::{UsbDeviceInfo, UsbEvent, UsbHost, UsbPort, BULK_IN_ENDPOINT};
use crate::prelude::{IqSampleBuffer, SdrError, SdrResult};
use crate::telemetry::metrics::{MetricsRecorder, StreamingStats};
use crossbeam::channel::Receiver;
use log::{info, warn};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Configuring,
    Connected,
    Streaming,
}

/// Notifications published to subscribers of [`SdrDeviceService::subscribe_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected {
        port: UsbPort,
        display_name: String,
    },
    Disconnected,
    StreamingStarted,
    StreamingStopped,
    AcquisitionFailed(String),
}

/// Owns the attached receiver: detection, tuning, and the acquisition task
/// that feeds the push callback and the pull queue.
pub struct SdrDeviceService {
    host: Arc<dyn UsbHost>,
    lookup: Arc<dyn CapabilityLookup>,
    tuner: Box<dyn Tuner>,
    initialized: bool,
    state: DeviceState,
    port: Option<UsbPort>,
    usb_info: Option<UsbDeviceInfo>,
    capability: Option<DeviceCapability>,
    config: Arc<RwLock<RuntimeConfig>>,
    queue: Option<SampleQueue>,
    callback: Arc<Mutex<Option<DataCallback>>>,
    metrics: Arc<MetricsRecorder>,
    acquisition: Option<AcquisitionTask>,
    usb_events: Option<Receiver<UsbEvent>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl SdrDeviceService {
    /// Service using the built-in RTL2832U table and a logging tuner.
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self::with_parts(host, Arc::new(KnownDeviceTable::new()), Box::new(LoggingTuner::new()))
    }

    pub fn with_parts(
        host: Arc<dyn UsbHost>,
        lookup: Arc<dyn CapabilityLookup>,
        tuner: Box<dyn Tuner>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            host,
            lookup,
            tuner,
            initialized: false,
            state: DeviceState::Disconnected,
            port: None,
            usb_info: None,
            capability: None,
            config: Arc::new(RwLock::new(RuntimeConfig::default())),
            queue: None,
            callback: Arc::new(Mutex::new(None)),
            metrics: Arc::new(MetricsRecorder::new()),
            acquisition: None,
            usb_events: None,
            events,
        }
    }

    pub fn initialize(&mut self) -> SdrResult<()> {
        if self.initialized {
            return Ok(());
        }
        info!("initializing SDR device service");
        self.usb_events = Some(self.host.subscribe());
        self.initialized = true;
        Ok(())
    }

    pub fn shutdown(&mut self) -> SdrResult<()> {
        if !self.initialized {
            return Ok(());
        }
        info!("shutting down SDR device service");
        self.disconnect_device()?;
        self.usb_events = None;
        self.queue = None;
        self.initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_device_connected(&self) -> bool {
        matches!(self.state, DeviceState::Connected | DeviceState::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.state == DeviceState::Streaming
    }

    pub fn device_capability(&self) -> Option<&DeviceCapability> {
        self.capability.as_ref()
    }

    pub fn usb_device_info(&self) -> Option<&UsbDeviceInfo> {
        self.usb_info.as_ref()
    }

    /// Receiver of lifecycle events. Slow receivers lose the oldest events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Scans the host ports for a recognized receiver and brings it up.
    pub fn detect_device(&mut self) -> SdrResult<()> {
        if !self.initialized {
            return Err(SdrError::NotInitialized);
        }
        if self.is_streaming() {
            return Ok(());
        }

        info!("detecting SDR device");
        let ports = self.host.ports().to_vec();
        for port in ports {
            if !self.host.is_device_connected(port) {
                continue;
            }
            let Some(usb) = self.host.device_info(port) else {
                continue;
            };
            let Some(profile) = self.lookup.lookup(usb.vendor_id, usb.product_id) else {
                warn!(
                    "unknown USB device: VID:{:04X} PID:{:04X}",
                    usb.vendor_id, usb.product_id
                );
                continue;
            };

            info!(
                "found SDR device: {} (VID:{:04X} PID:{:04X})",
                profile.display_name, usb.vendor_id, usb.product_id
            );
            let capability = DeviceCapability {
                vendor_id: usb.vendor_id,
                product_id: usb.product_id,
                display_name: profile.display_name,
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
                serial_number: usb.serial_number.clone(),
                tuner_type: profile.tuner_type,
                freq_min: profile.freq_min,
                freq_max: profile.freq_max,
                gain_values: profile.gain_values,
                supports_bias_tee: profile.supports_bias_tee,
                supports_direct_sampling: profile.supports_direct_sampling,
            };
            return self.bring_up(port, usb, capability);
        }

        warn!("no SDR device found");
        Err(SdrError::NotFound("no recognized SDR device on any port".into()))
    }

    fn bring_up(
        &mut self,
        port: UsbPort,
        usb: UsbDeviceInfo,
        capability: DeviceCapability,
    ) -> SdrResult<()> {
        self.state = DeviceState::Configuring;
        if let Err(err) = self.tuner.initialize(&capability) {
            warn!("tuner initialization failed: {err}");
            self.state = DeviceState::Disconnected;
            return Err(err);
        }

        // Carry the current settings over, clamped into the new device's limits.
        let current = self.config();
        let mut config = current.clone();
        if !capability.contains_frequency(config.center_freq) {
            config.center_freq = config.center_freq.clamp(capability.freq_min, capability.freq_max);
        }
        config.gain = capability.nearest_gain(config.gain).unwrap_or(config.gain);
        config.bias_tee_power &= capability.supports_bias_tee;
        config.direct_sampling &= capability.supports_direct_sampling;
        if config != current {
            info!("configuration adjusted to device limits: {config:?}");
        }
        self.write_config(config);

        let display_name = capability.display_name.clone();
        self.port = Some(port);
        self.usb_info = Some(usb);
        self.capability = Some(capability);
        self.state = DeviceState::Connected;
        self.publish(DeviceEvent::Connected { port, display_name });
        Ok(())
    }

    pub fn disconnect_device(&mut self) -> SdrResult<()> {
        if !self.is_device_connected() {
            return Ok(());
        }
        info!("disconnecting SDR device");
        self.stop_streaming()?;
        self.port = None;
        self.usb_info = None;
        self.capability = None;
        self.state = DeviceState::Disconnected;
        self.publish(DeviceEvent::Disconnected);
        Ok(())
    }

    /// Drains pending USB host events: a connect re-runs detection, a
    /// disconnect of our port tears the device down. Returns how many were handled.
    pub fn poll_usb_events(&mut self) -> usize {
        let pending: Vec<UsbEvent> = match self.usb_events.as_ref() {
            Some(events) => events.try_iter().collect(),
            None => return 0,
        };

        for event in &pending {
            info!("USB event: {event:?}");
            match *event {
                UsbEvent::Connected(_) => {
                    if !self.is_device_connected() {
                        if let Err(err) = self.detect_device() {
                            warn!("detection after connect failed: {err}");
                        }
                    }
                }
                UsbEvent::Disconnected(port) => {
                    if self.port == Some(port) {
                        if let Err(err) = self.disconnect_device() {
                            warn!("teardown after disconnect failed: {err}");
                        }
                    }
                }
            }
        }
        pending.len()
    }

    pub fn set_frequency(&mut self, hz: u32) -> SdrResult<()> {
        let capability = self.connected_capability()?;
        if let Err(err) = config::check_frequency(capability, hz) {
            warn!("{err}");
            return Err(err);
        }
        self.tuner.set_frequency(hz)?;
        self.update_config(|config| config.center_freq = hz);
        Ok(())
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> SdrResult<()> {
        self.connected_capability()?;
        if let Err(err) = config::check_sample_rate(hz) {
            warn!("{err}");
            return Err(err);
        }
        self.tuner.set_sample_rate(hz)?;
        self.update_config(|config| config.sample_rate = hz);
        info!("set sample rate to {hz} Hz");
        Ok(())
    }

    /// Applies the supported gain step closest to `db` and returns it.
    pub fn set_gain(&mut self, db: f32) -> SdrResult<f32> {
        let gain = config::snap_gain(self.connected_capability()?, db)?;
        self.tuner.set_gain(gain)?;
        self.update_config(|config| config.gain = gain);
        Ok(gain)
    }

    pub fn set_agc(&mut self, enabled: bool) -> SdrResult<()> {
        self.connected_capability()?;
        self.tuner.set_agc(enabled)?;
        self.update_config(|config| config.agc_enabled = enabled);
        info!("AGC {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn set_bias_tee(&mut self, enabled: bool) -> SdrResult<()> {
        let capability = self.connected_capability()?;
        if enabled {
            config::check_bias_tee(capability)?;
        }
        self.tuner.set_bias_tee(enabled)?;
        self.update_config(|config| config.bias_tee_power = enabled);
        info!("bias tee {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn set_direct_sampling(&mut self, enabled: bool) -> SdrResult<()> {
        let capability = self.connected_capability()?;
        if enabled {
            config::check_direct_sampling(capability)?;
        }
        self.tuner.set_direct_sampling(enabled)?;
        self.update_config(|config| config.direct_sampling = enabled);
        Ok(())
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config
            .read()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    /// Validates every field first, then programs the tuner. If the tuner
    /// fails part way, the fields already written are restored from the
    /// previous config and the stored config is left untouched.
    pub fn apply_config(&mut self, requested: &RuntimeConfig) -> SdrResult<()> {
        let target = requested.validated(self.connected_capability()?)?;
        let previous = self.config();

        if let Err(err) = program_tuner(self.tuner.as_mut(), &target) {
            warn!("applying config failed, restoring previous settings: {err}");
            if let Err(restore) = program_tuner(self.tuner.as_mut(), &previous) {
                warn!("restoring previous settings failed: {restore}");
            }
            return Err(err);
        }

        self.write_config(target);
        Ok(())
    }

    pub fn start_streaming(&mut self) -> SdrResult<()> {
        match self.state {
            DeviceState::Streaming => return Ok(()),
            DeviceState::Connected => {}
            _ => return Err(SdrError::NotAvailable("no SDR device connected".into())),
        }
        let port = self
            .port
            .ok_or_else(|| SdrError::NotAvailable("no SDR device connected".into()))?;

        info!("starting SDR data streaming");
        let config = self.config();
        let source = self.host.open_bulk_in(port, BULK_IN_ENDPOINT, &config)?;
        let queue = SampleQueue::bounded(config.buffer_count);
        self.metrics.reset();

        let task = AcquisitionTask::spawn(AcquisitionContext {
            source,
            queue: queue.clone(),
            callback: self.callback.clone(),
            metrics: self.metrics.clone(),
            tuning: self.config.clone(),
            events: self.events.clone(),
            block_size: config.buffer_size,
        })?;

        self.queue = Some(queue);
        self.acquisition = Some(task);
        self.state = DeviceState::Streaming;
        self.publish(DeviceEvent::StreamingStarted);
        info!("SDR streaming started");
        Ok(())
    }

    pub fn stop_streaming(&mut self) -> SdrResult<()> {
        if !self.is_streaming() {
            return Ok(());
        }
        info!("stopping SDR data streaming");
        if let Some(task) = self.acquisition.take() {
            task.stop();
        }
        self.state = DeviceState::Connected;
        self.publish(DeviceEvent::StreamingStopped);
        info!("SDR streaming stopped");
        Ok(())
    }

    /// True while streaming but the acquisition thread has already exited.
    pub fn acquisition_failed(&self) -> bool {
        self.is_streaming() && self.acquisition.as_ref().map_or(true, AcquisitionTask::is_finished)
    }

    /// Next queued buffer, waiting up to `timeout_ms` while streaming.
    /// Buffers still queued after a stop can be drained without waiting.
    pub fn get_next_buffer(&self, timeout_ms: u64) -> SdrResult<IqSampleBuffer> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| SdrError::NotAvailable("streaming has not been started".into()))?;

        if self.is_streaming() {
            queue.pop_timeout(Duration::from_millis(timeout_ms))
        } else {
            queue
                .try_pop()
                .ok_or_else(|| SdrError::NotAvailable("streaming stopped".into()))
        }
    }

    pub fn queued_buffers(&self) -> usize {
        self.queue.as_ref().map_or(0, SampleQueue::len)
    }

    /// Installs the push consumer, replacing any previous one. It runs on
    /// the acquisition thread and should return quickly.
    pub fn register_data_callback<F>(&self, callback: F)
    where
        F: FnMut(&IqSampleBuffer) + Send + 'static,
    {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(Box::new(callback));
        }
    }

    pub fn clear_data_callback(&self) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = None;
        }
    }

    pub fn streaming_stats(&self) -> StreamingStats {
        self.metrics.snapshot()
    }

    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    fn connected_capability(&self) -> SdrResult<&DeviceCapability> {
        match (&self.capability, self.is_device_connected()) {
            (Some(capability), true) => Ok(capability),
            _ => Err(SdrError::NotAvailable("no SDR device connected".into())),
        }
    }

    fn update_config(&self, apply: impl FnOnce(&mut RuntimeConfig)) {
        if let Ok(mut config) = self.config.write() {
            apply(&mut config);
        }
    }

    fn write_config(&self, config: RuntimeConfig) {
        self.update_config(|current| *current = config);
    }

    fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Drop for SdrDeviceService {
    fn drop(&mut self) {
        if let Some(task) = self.acquisition.take() {
            task.stop();
        }
    }
}

fn program_tuner(tuner: &mut dyn Tuner, config: &RuntimeConfig) -> SdrResult<()> {
    tuner.set_frequency(config.center_freq)?;
    tuner.set_sample_rate(config.sample_rate)?;
    tuner.set_gain(config.gain)?;
    tuner.set_agc(config.agc_enabled)?;
    tuner.set_bias_tee(config.bias_tee_power)?;
    tuner.set_direct_sampling(config.direct_sampling)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::source::{SampleSource, SyntheticConfig};
    use crate::device::tuner::TunerRegisters;
    use crate::device::usb::SimulatedUsbHost;
    use std::thread;

    fn dongle() -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id: 0x0bda,
            product_id: 0x2838,
            manufacturer: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
            serial_number: "00000001".into(),
        }
    }

    fn fast_host(pace_ms: u64) -> Arc<SimulatedUsbHost> {
        Arc::new(SimulatedUsbHost::new(SyntheticConfig {
            pace_ms,
            ..Default::default()
        }))
    }

    fn small_buffers(service: &mut SdrDeviceService, buffer_count: usize) {
        let config = RuntimeConfig {
            buffer_size: 2048,
            buffer_count,
            ..service.config()
        };
        service.apply_config(&config).unwrap();
    }

    fn connected(host: &Arc<SimulatedUsbHost>) -> SdrDeviceService {
        host.attach(UsbPort::UsbAHost, dongle());
        let mut service = SdrDeviceService::new(host.clone());
        service.initialize().unwrap();
        service.detect_device().unwrap();
        service
    }

    /// Records every write; refuses to enable AGC when `reject_agc` is set.
    struct ScriptedTuner {
        registers: Arc<Mutex<TunerRegisters>>,
        frequencies: Arc<Mutex<Vec<u32>>>,
        reject_agc: bool,
        fail_init: bool,
    }

    impl ScriptedTuner {
        fn new() -> Self {
            Self {
                registers: Arc::new(Mutex::new(TunerRegisters::default())),
                frequencies: Arc::new(Mutex::new(Vec::new())),
                reject_agc: false,
                fail_init: false,
            }
        }
    }

    impl Tuner for ScriptedTuner {
        fn initialize(&mut self, _capability: &DeviceCapability) -> SdrResult<()> {
            if self.fail_init {
                return Err(SdrError::Hardware("I2C write failed".into()));
            }
            Ok(())
        }

        fn set_frequency(&mut self, hz: u32) -> SdrResult<()> {
            self.frequencies.lock().unwrap().push(hz);
            self.registers.lock().unwrap().frequency = Some(hz);
            Ok(())
        }

        fn set_sample_rate(&mut self, hz: u32) -> SdrResult<()> {
            self.registers.lock().unwrap().sample_rate = Some(hz);
            Ok(())
        }

        fn set_gain(&mut self, db: f32) -> SdrResult<()> {
            self.registers.lock().unwrap().gain = Some(db);
            Ok(())
        }

        fn set_agc(&mut self, enabled: bool) -> SdrResult<()> {
            if enabled && self.reject_agc {
                return Err(SdrError::Hardware("AGC register write failed".into()));
            }
            self.registers.lock().unwrap().agc = enabled;
            Ok(())
        }

        fn set_bias_tee(&mut self, enabled: bool) -> SdrResult<()> {
            self.registers.lock().unwrap().bias_tee = enabled;
            Ok(())
        }

        fn set_direct_sampling(&mut self, enabled: bool) -> SdrResult<()> {
            self.registers.lock().unwrap().direct_sampling = enabled;
            Ok(())
        }
    }

    struct BrokenSource;

    impl SampleSource for BrokenSource {
        fn read_block(&mut self, _block: &mut [u8]) -> SdrResult<usize> {
            Err(SdrError::Hardware("bulk transfer stalled".into()))
        }
    }

    /// Host whose bulk pipe fails on the first read.
    struct StallingHost(SimulatedUsbHost);

    impl UsbHost for StallingHost {
        fn is_device_connected(&self, port: UsbPort) -> bool {
            self.0.is_device_connected(port)
        }

        fn device_info(&self, port: UsbPort) -> Option<UsbDeviceInfo> {
            self.0.device_info(port)
        }

        fn subscribe(&self) -> Receiver<UsbEvent> {
            self.0.subscribe()
        }

        fn open_bulk_in(
            &self,
            _port: UsbPort,
            _endpoint: u8,
            _config: &RuntimeConfig,
        ) -> SdrResult<Box<dyn SampleSource>> {
            Ok(Box::new(BrokenSource))
        }
    }

    #[test]
    fn detection_requires_initialization_and_a_known_device() {
        let host = fast_host(1);
        let mut service = SdrDeviceService::new(host.clone());
        assert_eq!(service.detect_device(), Err(SdrError::NotInitialized));

        service.initialize().unwrap();
        assert!(matches!(service.detect_device(), Err(SdrError::NotFound(_))));

        host.attach(
            UsbPort::UsbCOtg,
            UsbDeviceInfo {
                vendor_id: 0x1234,
                product_id: 0x5678,
                ..dongle()
            },
        );
        assert!(matches!(service.detect_device(), Err(SdrError::NotFound(_))));
        assert_eq!(service.state(), DeviceState::Disconnected);

        host.attach(UsbPort::UsbAHost, dongle());
        service.detect_device().unwrap();
        assert_eq!(service.state(), DeviceState::Connected);
        let capability = service.device_capability().unwrap();
        assert_eq!(capability.display_name, "RTL2832U+R820T2");
        assert_eq!(capability.serial_number, "00000001");
        assert_eq!(service.config().gain, 19.7);
    }

    #[test]
    fn failed_tuner_init_leaves_device_disconnected() {
        let host = fast_host(1);
        host.attach(UsbPort::UsbAHost, dongle());
        let mut tuner = ScriptedTuner::new();
        tuner.fail_init = true;
        let mut service =
            SdrDeviceService::with_parts(host, Arc::new(KnownDeviceTable::new()), Box::new(tuner));
        service.initialize().unwrap();

        assert!(matches!(service.detect_device(), Err(SdrError::Hardware(_))));
        assert_eq!(service.state(), DeviceState::Disconnected);
        assert!(service.device_capability().is_none());
    }

    #[test]
    fn setters_validate_before_touching_config() {
        let host = fast_host(1);
        let mut disconnected = SdrDeviceService::new(host.clone());
        disconnected.initialize().unwrap();
        assert!(matches!(
            disconnected.set_frequency(433_920_000),
            Err(SdrError::NotAvailable(_))
        ));

        let mut service = connected(&host);
        let before = service.config();
        assert!(matches!(
            service.set_frequency(10_000_000),
            Err(SdrError::InvalidParameter(_))
        ));
        assert!(matches!(
            service.set_sample_rate(5_000_000),
            Err(SdrError::InvalidParameter(_))
        ));
        assert!(matches!(service.set_bias_tee(true), Err(SdrError::NotSupported(_))));
        assert_eq!(service.config(), before);

        service.set_frequency(433_920_000).unwrap();
        service.set_sample_rate(1_024_000).unwrap();
        assert_eq!(service.set_gain(30.0).unwrap(), 29.7);
        service.set_agc(true).unwrap();
        service.set_bias_tee(false).unwrap();

        let after = service.config();
        assert_eq!(after.center_freq, 433_920_000);
        assert_eq!(after.sample_rate, 1_024_000);
        assert_eq!(after.gain, 29.7);
        assert!(after.agc_enabled);
    }

    #[test]
    fn apply_config_restores_tuner_when_a_write_fails() {
        let host = fast_host(1);
        host.attach(UsbPort::UsbAHost, dongle());
        let mut tuner = ScriptedTuner::new();
        tuner.reject_agc = true;
        let frequencies = tuner.frequencies.clone();
        let mut service =
            SdrDeviceService::with_parts(host, Arc::new(KnownDeviceTable::new()), Box::new(tuner));
        service.initialize().unwrap();
        service.detect_device().unwrap();
        let before = service.config();

        let requested = RuntimeConfig {
            center_freq: 433_920_000,
            agc_enabled: true,
            ..before.clone()
        };
        assert!(matches!(
            service.apply_config(&requested),
            Err(SdrError::Hardware(_))
        ));
        assert_eq!(service.config(), before);
        assert_eq!(
            *frequencies.lock().unwrap(),
            vec![433_920_000, before.center_freq]
        );

        let invalid = RuntimeConfig {
            center_freq: 433_920_000,
            sample_rate: 1,
            ..before.clone()
        };
        assert!(service.apply_config(&invalid).is_err());
        assert_eq!(frequencies.lock().unwrap().len(), 2);
    }

    #[test]
    fn pull_consumer_receives_tagged_buffers() {
        let host = fast_host(1);
        let mut service = connected(&host);
        small_buffers(&mut service, 8);
        service.set_frequency(144_800_000).unwrap();

        assert!(service.get_next_buffer(10).is_err());
        service.start_streaming().unwrap();
        assert!(service.is_streaming());

        let buffer = service.get_next_buffer(1000).unwrap();
        assert_eq!(buffer.len(), 1024);
        assert_eq!(buffer.center_freq, 144_800_000);
        assert_eq!(buffer.sample_rate, 2_048_000);
        assert!(buffer.samples.iter().all(|s| s.re.abs() <= 1.0 && s.im.abs() <= 1.0));

        service.stop_streaming().unwrap();
        assert_eq!(service.state(), DeviceState::Connected);
        assert!(service.streaming_stats().samples_received >= 1024);
    }

    #[test]
    fn pull_times_out_when_nothing_arrives() {
        let host = fast_host(400);
        let mut service = connected(&host);
        small_buffers(&mut service, 4);
        service.start_streaming().unwrap();

        assert_eq!(service.get_next_buffer(20), Err(SdrError::Timeout(20)));
        service.stop_streaming().unwrap();
    }

    #[test]
    fn slow_consumer_causes_overruns_not_stalls() {
        let host = fast_host(1);
        let mut service = connected(&host);
        small_buffers(&mut service, 3);
        service.start_streaming().unwrap();

        thread::sleep(Duration::from_millis(150));
        let first = service.streaming_stats().buffer_overruns;
        assert!(first > 0);
        assert!(service.queued_buffers() <= 3);

        thread::sleep(Duration::from_millis(150));
        let second = service.streaming_stats();
        assert!(second.buffer_overruns > first);
        assert!(service.queued_buffers() <= 3);
        assert!(!service.acquisition_failed());

        // The first buffer queued after a drop is marked.
        let mut saw_overflow = false;
        for _ in 0..16 {
            match service.get_next_buffer(500) {
                Ok(buffer) => saw_overflow |= buffer.overflow,
                Err(_) => break,
            }
        }
        assert!(saw_overflow);
        service.stop_streaming().unwrap();
    }

    #[test]
    fn callback_sees_buffers_in_order_and_nothing_after_stop() {
        let host = fast_host(1);
        let mut service = connected(&host);
        small_buffers(&mut service, 4);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service.register_data_callback(move |buffer| sink.lock().unwrap().push(buffer.timestamp));

        service.start_streaming().unwrap();
        thread::sleep(Duration::from_millis(100));
        service.stop_streaming().unwrap();

        let delivered = seen.lock().unwrap().clone();
        assert!(delivered.len() > 5);
        assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(seen.lock().unwrap().len(), delivered.len());
    }

    #[test]
    fn usb_events_drive_detection_and_teardown() {
        let host = fast_host(1);
        let mut service = SdrDeviceService::new(host.clone());
        service.initialize().unwrap();
        let mut events = service.subscribe_events();
        assert_eq!(service.poll_usb_events(), 0);

        host.attach(UsbPort::UsbCOtg, dongle());
        assert_eq!(service.poll_usb_events(), 1);
        assert!(service.is_device_connected());

        small_buffers(&mut service, 4);
        service.start_streaming().unwrap();
        host.detach(UsbPort::UsbCOtg);
        assert_eq!(service.poll_usb_events(), 1);
        assert_eq!(service.state(), DeviceState::Disconnected);
        assert!(!service.is_streaming());

        assert!(matches!(
            events.try_recv(),
            Ok(DeviceEvent::Connected {
                port: UsbPort::UsbCOtg,
                ..
            })
        ));
        assert_eq!(events.try_recv(), Ok(DeviceEvent::StreamingStarted));
        assert_eq!(events.try_recv(), Ok(DeviceEvent::StreamingStopped));
        assert_eq!(events.try_recv(), Ok(DeviceEvent::Disconnected));
    }

    #[test]
    fn read_failure_ends_acquisition_and_is_reported() {
        let host = Arc::new(StallingHost(SimulatedUsbHost::default()));
        host.0.attach(UsbPort::UsbAHost, dongle());
        let mut service = SdrDeviceService::new(host);
        service.initialize().unwrap();
        service.detect_device().unwrap();
        let mut events = service.subscribe_events();

        service.start_streaming().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(service.acquisition_failed());
        assert_eq!(service.streaming_stats().read_errors, 1);
        // The failure may be published before the start notification.
        let received: Vec<DeviceEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(received.contains(&DeviceEvent::StreamingStarted));
        assert!(received
            .iter()
            .any(|event| matches!(event, DeviceEvent::AcquisitionFailed(_))));

        service.stop_streaming().unwrap();
        assert!(!service.is_streaming());
    }

    #[test]
    fn shutdown_releases_the_device() {
        let host = fast_host(1);
        let mut service = connected(&host);
        small_buffers(&mut service, 4);
        service.start_streaming().unwrap();
        service.shutdown().unwrap();

        assert!(!service.is_initialized());
        assert_eq!(service.state(), DeviceState::Disconnected);
        assert_eq!(service.poll_usb_events(), 0);
    }
}
