//! Hop Latency - per-hop kernel latency from trace events
//!
//! Reads ftrace events for four observation points of a packet path,
//! correlates them into send/receive latency samples and prints a
//! summary when the stream ends or on Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a trace-cmd report
//! ./hop-latency hops.conf --input trace.report
//!
//! # Trace live, estimating tracing overhead first
//! sudo ./hop-latency hops.conf --live --overhead
//!
//! # Read raw trace_pipe lines from stdin, JSON summary
//! sudo cat /sys/kernel/debug/tracing/trace_pipe \
//!     | ./hop-latency hops.conf --format pipe --summary json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use hop_latency::{
    config::HopConfig,
    control::{ControlChannel, TracingControl, TracingSettings},
    events::EventProcessor,
    exporter::{ExporterType, SampleReporter},
    overhead::{OverheadEstimator, OverheadMeasurement, OverheadSettings},
    parser::LineFormat,
    probe::ProbeSettings,
    source::TraceSource,
};
use log::{info, warn};
use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use tokio::{runtime, signal, time::Instant};
use trace_common::{
    DEFAULT_TRACE_CLOCK, DEFAULT_TRACING_PATH, OVERHEAD_NPROBES, PROBE_INTERVAL_MS, PROBE_PORT,
    PROBE_REPLY_TIMEOUT_SECS, TRACING_SETTLE_SECS,
};

/// Per-hop packet latency from kernel trace events
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Hop configuration file (key:value lines)
    config: PathBuf,

    /// Input line format (report, pipe)
    #[clap(short, long, default_value = "report")]
    format: String,

    /// Replay trace lines from this file instead of stdin
    #[clap(short, long, conflicts_with = "live")]
    input: Option<PathBuf>,

    /// Configure tracing and read the kernel trace pipe
    #[clap(long)]
    live: bool,

    /// Tracing filesystem mount point
    #[clap(long, default_value = DEFAULT_TRACING_PATH)]
    tracing_path: PathBuf,

    /// Trace clock used when tracing live
    #[clap(long, default_value = DEFAULT_TRACE_CLOCK)]
    clock: String,

    /// Only trace events of this process
    #[clap(long)]
    pid: Option<u32>,

    /// Estimate tracing overhead before correlating
    #[clap(long)]
    overhead: bool,

    /// Tracing overhead per event in microseconds
    #[clap(long, conflicts_with = "overhead")]
    usec_per_event: Option<f64>,

    /// Number of loopback probes for the overhead estimate
    #[clap(long, default_value_t = OVERHEAD_NPROBES)]
    nprobes: u32,

    /// UDP port of the loopback probe
    #[clap(long, default_value_t = PROBE_PORT)]
    probe_port: u16,

    /// Pause between loopback probes in milliseconds
    #[clap(long, default_value_t = PROBE_INTERVAL_MS)]
    probe_interval_ms: u64,

    /// Wait after enabling tracing before measuring (seconds)
    #[clap(long, default_value_t = TRACING_SETTLE_SECS)]
    settle_secs: u64,

    /// Give up waiting for the overhead event counter (seconds, 0 = forever)
    #[clap(long, default_value_t = 0)]
    overhead_timeout_secs: u64,

    /// Summary format (text, json)
    #[clap(short, long, default_value = "text")]
    summary: String,

    /// Also print individual send and receive hops
    #[clap(long)]
    hops: bool,

    /// Progress reporting interval in seconds (0 = off)
    #[clap(long, default_value_t = 0)]
    progress_interval: u64,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

impl Args {
    fn tracing_settings(&self, config: &HopConfig) -> TracingSettings {
        TracingSettings {
            events: Some(config.trace_events()),
            pid: self.pid,
            clock: Some(self.clock.clone()),
        }
    }

    fn overhead_settings(&self, config: &HopConfig) -> OverheadSettings {
        OverheadSettings {
            probe: ProbeSettings {
                target: SocketAddr::from((Ipv4Addr::LOCALHOST, self.probe_port)),
                rounds: self.nprobes,
                interval: Duration::from_millis(self.probe_interval_ms),
                reply_timeout: Duration::from_secs(PROBE_REPLY_TIMEOUT_SECS),
            },
            tracing: self.tracing_settings(config),
            settle_delay: Duration::from_secs(self.settle_secs),
            reader_timeout: Some(Duration::from_secs(self.overhead_timeout_secs))
                .filter(|d| !d.is_zero()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(args));

    // A stdin read parked on the blocking pool is not waited for
    runtime.shutdown_background();
    result
}

async fn run(args: Args) -> Result<()> {

    let mut format: LineFormat = args.format.parse().map_err(anyhow::Error::msg)?;
    let summary: ExporterType = args.summary.parse().map_err(anyhow::Error::msg)?;

    let config = HopConfig::load(&args.config)
        .with_context(|| format!("Failed to load hop configuration {:?}", args.config))?;
    config.log_summary();

    let control = TracingControl::new(&args.tracing_path);

    let overhead = if args.overhead {
        estimate_overhead(&control, args.overhead_settings(&config)).await?
    } else {
        None
    };
    let usec_per_event = overhead
        .map(|m| m.usec_per_event)
        .or(args.usec_per_event)
        .unwrap_or(0.0);
    info!("Overhead adjustment: {:.4} us/event", usec_per_event);

    let mut source = if args.live {
        if format != LineFormat::Pipe {
            info!("Live tracing reads trace_pipe, using pipe format");
            format = LineFormat::Pipe;
        }
        info!("Enabling tracing under {:?}", control.root());
        control
            .start(&args.tracing_settings(&config))
            .context("Failed to enable tracing")?;
        match control.open_source().await {
            Ok(source) => source,
            Err(e) => {
                release(&control);
                return Err(e.into());
            }
        }
    } else if let Some(path) = &args.input {
        TraceSource::open(path).await?
    } else {
        info!("Reading trace lines from stdin");
        TraceSource::stdin()
    };

    let reporter = SampleReporter::new(io::stdout(), args.hops);
    let mut processor = EventProcessor::new(&config, format, usec_per_event, reporter)
        .with_progress(Duration::from_secs(args.progress_interval));

    info!("Correlating events...");
    let start_time = Instant::now();

    let result = tokio::select! {
        result = processor.run(&mut source) => result,
        _ = signal::ctrl_c() => {
            info!("Interrupted, shutting down...");
            Ok(())
        }
    };

    if args.live {
        release(&control);
    }
    result.context("Correlation stopped")?;

    let elapsed = start_time.elapsed().as_secs();
    let metrics = processor.metrics(elapsed, overhead);

    summary
        .exporter()
        .export(&metrics, &mut io::stdout().lock())?;

    info!(
        "Done: {} lines in {} seconds, {} round trips",
        metrics.lines_read, metrics.duration_seconds, metrics.rtt.samples
    );

    Ok(())
}

/// Run the estimator, tolerating failures that still allow correlation
async fn estimate_overhead(
    control: &TracingControl,
    settings: OverheadSettings,
) -> Result<Option<OverheadMeasurement>> {
    info!("Estimating tracing overhead ({} probes)...", settings.probe.rounds);

    match OverheadEstimator::new(control, settings).estimate().await {
        Ok(measurement) => {
            info!(
                "   {:.4} us/event (untraced {:.1} us, traced {:.1} us)",
                measurement.usec_per_event,
                measurement.baseline_rtt_us,
                measurement.traced_rtt_us
            );
            Ok(Some(measurement))
        }
        Err(e) if e.is_fatal_setup() => Err(e).context("Overhead estimation failed"),
        Err(e) => {
            warn!("Overhead estimation failed: {}; continuing without adjustment", e);
            Ok(None)
        }
    }
}

fn release(control: &TracingControl) {
    if let Err(e) = control.release() {
        warn!("Failed to release tracing: {}", e);
    }
}

fn print_banner() {
    eprintln!(
        r#"
╔═══════════════════════════════════════════════════╗
║        Hop Latency - Kernel Trace Correlator      ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}
