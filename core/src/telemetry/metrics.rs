use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

/// Snapshot of the acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingStats {
    pub samples_received: u64,
    pub buffer_overruns: u64,
    pub read_errors: u64,
    /// Samples per second since the counters were last reset.
    pub data_rate: f32,
}

/// Counters shared between the acquisition task and the service.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

struct Metrics {
    samples_received: u64,
    buffer_overruns: u64,
    read_errors: u64,
    since: Instant,
}

impl Metrics {
    fn fresh() -> Self {
        Self {
            samples_received: 0,
            buffer_overruns: 0,
            read_errors: 0,
            since: Instant::now(),
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::fresh()),
        }
    }

    pub fn record_samples(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.samples_received += count as u64;
        }
    }

    pub fn record_overrun(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.buffer_overruns += 1;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.read_errors += 1;
        }
    }

    pub fn reset(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            *metrics = Metrics::fresh();
        }
    }

    pub fn snapshot(&self) -> StreamingStats {
        if let Ok(metrics) = self.inner.lock() {
            let elapsed = metrics.since.elapsed().as_secs_f32();
            let data_rate = if elapsed > 0.0 {
                metrics.samples_received as f32 / elapsed
            } else {
                0.0
            };
            StreamingStats {
                samples_received: metrics.samples_received,
                buffer_overruns: metrics.buffer_overruns,
                read_errors: metrics.read_errors,
                data_rate,
            }
        } else {
            StreamingStats::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let recorder = MetricsRecorder::new();
        recorder.record_samples(512);
        recorder.record_samples(512);
        recorder.record_overrun();
        recorder.record_error();

        let stats = recorder.snapshot();
        assert_eq!(stats.samples_received, 1024);
        assert_eq!(stats.buffer_overruns, 1);
        assert_eq!(stats.read_errors, 1);
        assert!(stats.data_rate >= 0.0);

        recorder.reset();
        assert_eq!(recorder.snapshot().samples_received, 0);
        assert_eq!(recorder.snapshot().buffer_overruns, 0);
    }
}
