use crate::config::RuntimeConfig;
use crate::device::service::DeviceEvent;
use crate::device::source::SampleSource;
use crate::prelude::{IqSample, IqSampleBuffer, SdrError, SdrResult};
use crate::processing::buffer_pool::BufferPool;
use crate::telemetry::metrics::MetricsRecorder;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Push consumer invoked on the acquisition thread for every buffer.
pub type DataCallback = Box<dyn FnMut(&IqSampleBuffer) + Send>;

/// Transfer blocks kept for reuse by one acquisition task.
const TRANSFER_BLOCKS: usize = 2;

/// Maps interleaved unsigned bytes to samples, `(byte - 127.5) / 127.5`.
/// A trailing unpaired byte is ignored.
pub fn convert_samples(raw: &[u8]) -> Vec<IqSample> {
    raw.chunks_exact(2)
        .map(|pair| IqSample::new(normalize(pair[0]), normalize(pair[1])))
        .collect()
}

fn normalize(byte: u8) -> f32 {
    (byte as f32 - 127.5) / 127.5
}

/// Bounded FIFO between the acquisition task and pull consumers.
/// Pushing never blocks; popping waits up to a timeout.
#[derive(Clone)]
pub struct SampleQueue {
    tx: Sender<IqSampleBuffer>,
    rx: Receiver<IqSampleBuffer>,
    capacity: usize,
}

impl SampleQueue {
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Hands the buffer back when the queue is full.
    pub fn try_push(&self, buffer: IqSampleBuffer) -> Result<(), IqSampleBuffer> {
        self.tx.try_send(buffer).map_err(|err| match err {
            TrySendError::Full(buffer) | TrySendError::Disconnected(buffer) => buffer,
        })
    }

    pub fn pop_timeout(&self, timeout: Duration) -> SdrResult<IqSampleBuffer> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SdrError::Timeout(timeout.as_millis() as u64),
            RecvTimeoutError::Disconnected => SdrError::NotAvailable("sample queue closed".into()),
        })
    }

    pub fn try_pop(&self) -> Option<IqSampleBuffer> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Everything the acquisition thread owns or shares with the service.
pub struct AcquisitionContext {
    pub source: Box<dyn SampleSource>,
    pub queue: SampleQueue,
    pub callback: Arc<Mutex<Option<DataCallback>>>,
    pub metrics: Arc<MetricsRecorder>,
    pub tuning: Arc<RwLock<RuntimeConfig>>,
    pub events: broadcast::Sender<DeviceEvent>,
    pub block_size: usize,
}

/// Handle to the single acquisition thread.
pub struct AcquisitionTask {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionTask {
    pub fn spawn(context: AcquisitionContext) -> SdrResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("sdr-acquisition".into())
            .spawn(move || run(context, &stop_flag))
            .map_err(|err| SdrError::Hardware(format!("spawning acquisition task: {err}")))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// True once the thread has exited on its own, e.g. after a read failure.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the thread and waits for it; no buffer is produced afterwards.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("acquisition task panicked");
            }
        }
    }
}

impl Drop for AcquisitionTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut context: AcquisitionContext, stop: &AtomicBool) {
    info!("acquisition task started");
    let mut pool = BufferPool::with_capacity(TRANSFER_BLOCKS);
    let started = Instant::now();
    let mut dropped = false;

    while !stop.load(Ordering::Acquire) {
        let mut block = match pool.checkout(context.block_size) {
            Ok(block) => block,
            Err(err) => {
                error!("acquisition stopped: {err}");
                let _ = context.events.send(DeviceEvent::AcquisitionFailed(err.to_string()));
                break;
            }
        };

        let read = context.source.read_block(&mut block);
        let length = match read {
            Ok(length) => length.min(block.len()),
            Err(err) => {
                context.metrics.record_error();
                error!("bulk read failed: {err}");
                let _ = context.events.send(DeviceEvent::AcquisitionFailed(err.to_string()));
                break;
            }
        };
        if stop.load(Ordering::Acquire) {
            break;
        }

        let (sample_rate, center_freq) = context
            .tuning
            .read()
            .map(|config| (config.sample_rate, config.center_freq))
            .unwrap_or_default();
        let buffer = IqSampleBuffer {
            samples: convert_samples(&block[..length]),
            sample_rate,
            center_freq,
            timestamp: started.elapsed().as_micros() as u64,
            overflow: dropped,
        };
        pool.release(block);
        let sample_count = buffer.len();

        if let Ok(mut callback) = context.callback.lock() {
            if let Some(callback) = callback.as_mut() {
                callback(&buffer);
            }
        }

        match context.queue.try_push(buffer) {
            Ok(()) => dropped = false,
            Err(_) => {
                context.metrics.record_overrun();
                dropped = true;
            }
        }
        context.metrics.record_samples(sample_count);
    }

    info!("acquisition task ended");
}
