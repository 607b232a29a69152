//! Output of samples and summaries
//!
//! Per-sample lines are streamed as they are accepted; the summary is
//! rendered once at the end, as text or JSON.

use crate::{
    correlator::{CorrelationOutcome, LatencySample},
    types::LatencyMetrics,
};
use anyhow::{Context, Result};
use std::{io, io::Write, str::FromStr};

/// Trait for summary exporters
pub trait MetricsExporter {
    /// Export metrics
    ///
    /// # Arguments
    ///
    /// * `metrics` - Aggregated metrics to export
    /// * `out` - Destination, usually stdout
    fn export(&self, metrics: &LatencyMetrics, out: &mut dyn Write) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// Human-readable stats block
    Text,
    /// JSON document
    Json,
}

impl FromStr for ExporterType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ExporterType::Text),
            "json" => Ok(ExporterType::Json),
            _ => Err(format!("Unsupported summary format: {}. Use text or json", s)),
        }
    }
}

impl ExporterType {
    pub fn exporter(&self) -> Box<dyn MetricsExporter> {
        match self {
            ExporterType::Text => Box::new(TextExporter),
            ExporterType::Json => Box::new(JsonExporter::new(true)),
        }
    }
}

/// JSON exporter
pub struct JsonExporter {
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `pretty` - Enable pretty-printing
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, metrics: &LatencyMetrics, out: &mut dyn Write) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(metrics)?
        } else {
            serde_json::to_string(metrics)?
        };

        writeln!(out, "{}", json).context("Failed to write JSON summary")?;
        Ok(())
    }
}

/// Plain text stats block
pub struct TextExporter;

impl TextExporter {
    fn to_text(metrics: &LatencyMetrics) -> String {
        let rtt = &metrics.rtt;
        let mut output = String::new();

        output.push_str("\nLatency stats:\n");
        output.push_str(&format!("send mean: {} usec\n", metrics.send.mean_us));
        output.push_str(&format!("recv mean: {} usec\n", metrics.recv.mean_us));
        output.push_str(&format!("rtt  mean: {} usec\n", rtt.mean_us));
        output.push('\n');

        output.push_str(&format!(
            "samples:   send {} (discarded {}), recv {} (discarded {})\n",
            metrics.send.samples,
            metrics.send.discarded,
            metrics.recv.samples,
            metrics.recv.discarded
        ));
        output.push_str(&format!(
            "lines:     {} read, {} unparsed\n",
            metrics.lines_read, metrics.unparsed_lines
        ));

        if metrics.usec_per_event > 0.0 {
            output.push_str(&format!(
                "adjusted:  send {:.2} usec, recv {:.2} usec, rtt {:.2} usec ({:.4} usec/event)\n",
                metrics.send.adjusted_mean_us,
                metrics.recv.adjusted_mean_us,
                rtt.adjusted_mean_us,
                metrics.usec_per_event
            ));
        }

        if rtt.samples > 0 {
            output.push_str(&format!(
                "rtt range: min {:.0} / max {:.0} / stddev {:.2} usec\n",
                rtt.min_us, rtt.max_us, rtt.std_dev_us
            ));
            output.push_str(&format!(
                "rtt pct:   p50 {:.0}  p90 {:.0}  p99 {:.0}  p999 {:.0}\n",
                rtt.percentiles.p50, rtt.percentiles.p90, rtt.percentiles.p99, rtt.percentiles.p999
            ));
            let h = &rtt.histogram;
            output.push_str(&format!(
                concat!(
                    "rtt hist:  <50us {}  50-100us {}  100-250us {}  ",
                    "250-500us {}  500us-1ms {}  1ms+ {}\n"
                ),
                h.bucket_0_50us,
                h.bucket_50_100us,
                h.bucket_100_250us,
                h.bucket_250_500us,
                h.bucket_500us_1ms,
                h.bucket_1ms_plus
            ));
        }

        output
    }
}

impl MetricsExporter for TextExporter {
    fn export(&self, metrics: &LatencyMetrics, out: &mut dyn Write) -> Result<()> {
        out.write_all(Self::to_text(metrics).as_bytes())
            .context("Failed to write summary")?;
        Ok(())
    }
}

/// Streams one line per correlation outcome
pub struct SampleReporter<W: Write> {
    out: W,
    show_hops: bool,
}

impl<W: Write> SampleReporter<W> {
    /// # Arguments
    ///
    /// * `out` - Destination of sample lines
    /// * `show_hops` - Also print the individual send and receive hops
    pub fn new(out: W, show_hops: bool) -> Self {
        Self { out, show_hops }
    }

    pub fn report(&mut self, outcome: &CorrelationOutcome) -> io::Result<()> {
        match outcome {
            CorrelationOutcome::Send(send) => {
                if self.show_hops {
                    self.write_hop(send)?;
                }
            }
            CorrelationOutcome::RoundTrip { recv, rtt } => {
                if self.show_hops {
                    self.write_hop(recv)?;
                }
                writeln!(
                    self.out,
                    "[{}] rtt raw_latency: {}, events_overhead: {:.6}, adj_latency: {:.6}",
                    rtt.timestamp, rtt.raw_us, rtt.overhead_us, rtt.adjusted_us
                )?;
            }
            CorrelationOutcome::Outlier { direction, raw_us } => {
                writeln!(self.out, "discarded {}: {}", direction, raw_us)?;
            }
            CorrelationOutcome::OutOfOrder { direction } => {
                writeln!(self.out, "discarded {}: negative delta", direction)?;
            }
        }
        self.out.flush()
    }

    fn write_hop(&mut self, sample: &LatencySample) -> io::Result<()> {
        writeln!(
            self.out,
            "{} raw_latency: {}, num_events: {}, events_overhead: {:.6}, adj_latency: {:.6}",
            sample.direction, sample.raw_us, sample.events, sample.overhead_us, sample.adjusted_us
        )
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        correlator::{Direction, RoundTrip},
        types::*,
    };

    fn create_test_metrics() -> LatencyMetrics {
        LatencyMetrics {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            lines_read: 1000,
            unparsed_lines: 12,
            usec_per_event: 0.0,
            send: DirectionMetrics {
                samples: 3,
                discarded: 1,
                mean_us: 200,
                adjusted_mean_us: 200.0,
            },
            recv: DirectionMetrics {
                samples: 3,
                discarded: 0,
                mean_us: 50,
                adjusted_mean_us: 50.0,
            },
            rtt: RoundTripMetrics {
                samples: 3,
                mean_us: 250,
                ..Default::default()
            },
            overhead: None,
        }
    }

    fn sample(direction: Direction, raw_us: u64) -> LatencySample {
        LatencySample {
            direction,
            timestamp: Timestamp::new(100, 250),
            raw_us,
            events: 3,
            overhead_us: 1.5,
            adjusted_us: raw_us as f64 - 1.5,
        }
    }

    #[test]
    fn test_text_format() {
        let text = TextExporter::to_text(&create_test_metrics());

        assert!(text.contains("send mean: 200 usec"));
        assert!(text.contains("recv mean: 50 usec"));
        assert!(text.contains("rtt  mean: 250 usec"));
        assert!(text.contains("1000 read, 12 unparsed"));
        assert!(!text.contains("usec/event"));
    }

    #[test]
    fn test_json_format() {
        let mut out = Vec::new();
        JsonExporter::new(false)
            .export(&create_test_metrics(), &mut out)
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["send"]["mean_us"], 200);
        assert_eq!(value["rtt"]["mean_us"], 250);
        assert!(value.get("overhead").is_none());
    }

    #[test]
    fn test_exporter_type_from_str() {
        assert_eq!("JSON".parse::<ExporterType>(), Ok(ExporterType::Json));
        assert_eq!("text".parse::<ExporterType>(), Ok(ExporterType::Text));
        assert!("prometheus".parse::<ExporterType>().is_err());
    }

    #[test]
    fn test_sample_lines() {
        let mut reporter = SampleReporter::new(Vec::new(), false);

        reporter
            .report(&CorrelationOutcome::Send(sample(Direction::Send, 40)))
            .unwrap();
        reporter
            .report(&CorrelationOutcome::RoundTrip {
                recv: sample(Direction::Recv, 25),
                rtt: RoundTrip {
                    timestamp: Timestamp::new(100, 250),
                    raw_us: 65,
                    overhead_us: 3.0,
                    adjusted_us: 62.0,
                },
            })
            .unwrap();
        reporter
            .report(&CorrelationOutcome::Outlier {
                direction: Direction::Recv,
                raw_us: 1_500_000,
            })
            .unwrap();

        let text = String::from_utf8(reporter.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[100.000250] rtt raw_latency: 65, events_overhead: 3.000000, adj_latency: 62.000000",
                "discarded recv: 1500000",
            ]
        );
    }

    #[test]
    fn test_hop_lines_when_enabled() {
        let mut reporter = SampleReporter::new(Vec::new(), true);
        reporter
            .report(&CorrelationOutcome::Send(sample(Direction::Send, 40)))
            .unwrap();

        let text = String::from_utf8(reporter.get_ref().clone()).unwrap();
        assert_eq!(
            text,
            "send raw_latency: 40, num_events: 3, events_overhead: 1.500000, adj_latency: 38.500000\n"
        );
    }
}
