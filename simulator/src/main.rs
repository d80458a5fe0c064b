use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::info;
use sdrcore::processing::DemodMode;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Am,
    Fm,
    Usb,
    Lsb,
}

impl From<Mode> for DemodMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Am => DemodMode::Am,
            Mode::Fm => DemodMode::Fm,
            Mode::Usb => DemodMode::Usb,
            Mode::Lsb => DemodMode::Lsb,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Drives the RTL-SDR core against a simulated dongle")]
struct Args {
    /// Pull a fixed number of buffers and print a JSON summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 100_000_000)]
    frequency: u32,
    #[arg(long, default_value_t = 2_048_000)]
    sample_rate: u32,
    #[arg(long, default_value_t = 20.0)]
    gain: f32,
    #[arg(long, value_enum, default_value_t = Mode::Fm)]
    mode: Mode,
    #[arg(long, default_value_t = 1024)]
    fft_size: usize,
    #[arg(long, default_value_t = 16)]
    buffers: usize,
    /// Also write the offline summary to this file
    #[arg(long)]
    report: Option<PathBuf>,
    /// Stream until Ctrl+C, logging stats periodically
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Seconds between stats reports while serving
    #[arg(long, default_value_t = 2)]
    report_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(
            args.frequency,
            args.sample_rate,
            args.gain,
            args.mode.into(),
            args.fft_size,
            args.buffers,
        )
    };

    let runner = Runner::new(workflow_config);

    if args.offline {
        let result = runner.execute()?;
        let summary =
            serde_json::to_string_pretty(&result).context("serializing offline summary")?;
        println!("{summary}");

        if let Some(report_path) = args.report {
            if let Some(parent) = report_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&report_path, summary.as_bytes())
                .with_context(|| format!("writing report {}", report_path.display()))?;
        }
    }
    if args.serve {
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        let stats = runtime.block_on(runner.serve(Duration::from_secs(args.report_secs.max(1))))?;
        info!(
            "stopped after {} samples, {} overruns",
            stats.samples_received, stats.buffer_overruns
        );
    }

    Ok(())
}
