use crate::generator::profile::attach_simulated_dongle;
use crate::workflow::config::WorkflowConfig;
use anyhow::{bail, Context};
use log::{info, warn};
use sdrcore::device::SdrDeviceService;
use sdrcore::prelude::{ProcessingStage, StageInput};
use sdrcore::processing::{AudioDemodulator, SpectralPeak, SpectrumAnalyzer};
use sdrcore::telemetry::StreamingStats;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;

const PULL_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub device: String,
    pub center_freq: u32,
    pub buffers: usize,
    pub discontinuities: usize,
    pub noise_floor: f32,
    pub peaks: Vec<SpectralPeak>,
    pub audio_samples: usize,
    pub stats: StreamingStats,
    pub notes: Vec<String>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Plugs the simulated dongle in and brings the device service up with
    /// the workflow's runtime settings.
    pub fn connect(&self) -> anyhow::Result<SdrDeviceService> {
        self.config.validate().context("validating workflow config")?;
        let host = attach_simulated_dongle(&self.config.generator)
            .context("attaching simulated dongle")?;

        let mut service = SdrDeviceService::new(host);
        service.initialize().context("initializing device service")?;
        service.detect_device().context("detecting receiver")?;
        service
            .apply_config(&self.config.device)
            .context("applying runtime config")?;
        Ok(service)
    }

    fn spectrum_stage(&self) -> anyhow::Result<SpectrumAnalyzer> {
        let stage_config = self.config.to_stage_config();
        let mut analyzer = SpectrumAnalyzer::new(stage_config.fft_size, stage_config.sample_rate);
        analyzer.set_averaging(self.config.analysis.averaging, self.config.analysis.averaging_factor);
        analyzer
            .initialize(&stage_config)
            .context("initializing spectrum stage")?;
        Ok(analyzer)
    }

    fn demod_stage(&self) -> anyhow::Result<AudioDemodulator> {
        let stage_config = self.config.to_stage_config();
        let mut demod = AudioDemodulator::new(self.config.analysis.mode, stage_config.sample_rate)
            .context("creating demodulator")?;
        demod
            .set_bandwidth(self.config.analysis.bandwidth)
            .context("setting demodulator bandwidth")?;
        demod
            .initialize(&stage_config)
            .context("initializing demodulation stage")?;
        Ok(demod)
    }

    /// Pulls a fixed number of buffers through spectrum analysis and
    /// demodulation, then stops the stream.
    pub fn execute(&self) -> anyhow::Result<WorkflowResult> {
        let mut service = self.connect()?;
        let mut analyzer = self.spectrum_stage()?;
        let mut demod = self.demod_stage()?;
        let threshold = self.config.analysis.peak_threshold_db;

        service.start_streaming().context("starting stream")?;

        let mut discontinuities = 0;
        let mut audio_samples = 0;
        let mut spectrum = Vec::new();
        let mut notes = Vec::new();
        for index in 0..self.config.analysis.buffers {
            let buffer = service
                .get_next_buffer(PULL_TIMEOUT_MS)
                .with_context(|| format!("pulling buffer {index}"))?;
            if buffer.overflow {
                discontinuities += 1;
            }

            let spectrum_output = analyzer
                .execute(StageInput::from(&buffer))
                .with_context(|| format!("executing spectrum stage on buffer {index}"))?;
            let audio_output = demod
                .execute(StageInput::from(&buffer))
                .with_context(|| format!("executing demodulation stage on buffer {index}"))?;

            audio_samples += audio_output.samples.len();
            spectrum = spectrum_output.samples;
            notes = spectrum_output.metadata.notes;
            notes.extend(audio_output.metadata.notes);
        }

        service.stop_streaming().context("stopping stream")?;
        let noise_floor = analyzer.noise_floor();
        let peaks = analyzer.find_peaks(&spectrum, threshold);
        analyzer.cleanup();
        demod.cleanup();

        let device = service
            .device_capability()
            .map(|capability| capability.display_name.clone())
            .unwrap_or_default();
        Ok(WorkflowResult {
            device,
            center_freq: service.config().center_freq,
            buffers: self.config.analysis.buffers,
            discontinuities,
            noise_floor,
            peaks,
            audio_samples,
            stats: service.streaming_stats(),
            notes,
        })
    }

    /// Streams on the push path until Ctrl+C, logging stats and device
    /// events every `report_every`.
    pub async fn serve(&self, report_every: Duration) -> anyhow::Result<StreamingStats> {
        let mut service = self.connect()?;
        let mut analyzer = self.spectrum_stage()?;
        let threshold = self.config.analysis.peak_threshold_db;
        let strongest: Arc<Mutex<Option<SpectralPeak>>> = Arc::new(Mutex::new(None));

        let sink = strongest.clone();
        service.register_data_callback(move |buffer| {
            let spectrum = analyzer.analyze_spectrum(&buffer.samples, buffer.center_freq as f32);
            let peak = analyzer
                .find_peaks(&spectrum, threshold)
                .into_iter()
                .max_by(|a, b| a.power_db.total_cmp(&b.power_db));
            if let Ok(mut slot) = sink.lock() {
                *slot = peak;
            }
        });

        let mut events = service.subscribe_events();
        service.start_streaming().context("starting stream")?;
        info!("streaming (Ctrl+C to stop)...");

        let mut ticker = tokio::time::interval(report_every);
        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                stopped = &mut ctrl_c => {
                    stopped.context("awaiting Ctrl+C to exit")?;
                    break;
                }
                _ = ticker.tick() => {
                    service.poll_usb_events();
                    while let Ok(event) = events.try_recv() {
                        info!("device event: {event:?}");
                    }
                    if service.acquisition_failed() {
                        bail!("acquisition stopped unexpectedly");
                    }
                    let stats = service.streaming_stats();
                    let peak = strongest.lock().ok().and_then(|slot| *slot);
                    info!(
                        "samples={} overruns={} rate={:.0} S/s peak={:?}",
                        stats.samples_received, stats.buffer_overruns, stats.data_rate, peak
                    );
                }
            }
        }

        let stats = service.streaming_stats();
        if let Err(err) = service.shutdown() {
            warn!("shutdown failed: {err}");
        }
        Ok(stats)
    }
}
