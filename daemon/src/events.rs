//! Trace event processing
//!
//! Pulls lines from a [`LineSource`], parses them, feeds the correlator
//! and streams accepted samples to the reporter.

use crate::{
    collector::MetricsCollector,
    config::HopConfig,
    correlator::{CorrelationOutcome, Correlator},
    error::{LatencyError, Result},
    exporter::SampleReporter,
    overhead::OverheadMeasurement,
    parser::LineFormat,
    source::LineSource,
    types::LatencyMetrics,
};
use log::{debug, info, trace, warn};
use std::{io::Write, time::Duration};
use tokio::time::{interval, MissedTickBehavior};

/// Single-consumer event processor
pub struct EventProcessor<'a, W: Write> {
    correlator: Correlator<'a>,
    format: LineFormat,
    reporter: SampleReporter<W>,
    collector: MetricsCollector,
    progress_interval: Option<Duration>,
}

impl<'a, W: Write> EventProcessor<'a, W> {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `config` - Observation points of the measured path
    /// * `format` - Layout of incoming lines
    /// * `usec_per_event` - Tracing overhead per event (0 disables adjustment)
    /// * `reporter` - Destination of per-sample lines
    pub fn new(
        config: &'a HopConfig,
        format: LineFormat,
        usec_per_event: f64,
        reporter: SampleReporter<W>,
    ) -> Self {
        Self {
            correlator: Correlator::new(config, usec_per_event),
            format,
            reporter,
            collector: MetricsCollector::new(),
            progress_interval: None,
        }
    }

    /// Log progress every `every`; zero disables it
    pub fn with_progress(mut self, every: Duration) -> Self {
        self.progress_interval = Some(every).filter(|d| !d.is_zero());
        self
    }

    /// Handle one raw line
    pub fn handle_line(&mut self, line: &str) -> Result<Option<CorrelationOutcome>> {
        let Some(event) = self.format.parse(line) else {
            trace!("unparsed: {}", line);
            self.collector.add_line(false);
            return Ok(None);
        };
        self.collector.add_line(true);
        trace!("{}", event);

        let outcome = self.correlator.process(&event);
        if let Some(outcome) = &outcome {
            match outcome {
                CorrelationOutcome::Outlier { direction, raw_us } => {
                    warn!("Discarded {} sample of {} us", direction, raw_us);
                }
                CorrelationOutcome::OutOfOrder { direction } => {
                    warn!("Discarded {} sample with negative delta", direction);
                }
                _ => {}
            }
            self.collector.add_outcome(outcome);
            self.reporter
                .report(outcome)
                .map_err(|source| LatencyError::Io {
                    context: "writing sample",
                    source,
                })?;
        }
        Ok(outcome)
    }

    /// Consume `source` until it ends
    ///
    /// Stopping early is done by dropping the returned future; line
    /// sources are cancel safe and state gathered so far stays available
    /// through [`EventProcessor::metrics`].
    pub async fn run<S: LineSource>(&mut self, source: &mut S) -> Result<()> {
        let Some(every) = self.progress_interval else {
            while let Some(line) = source.next_line().await? {
                self.handle_line(&line)?;
            }
            debug!("Trace source ended");
            return Ok(());
        };

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                line = source.next_line() => match line? {
                    Some(line) => {
                        self.handle_line(&line)?;
                    }
                    None => break,
                },
                _ = ticker.tick() => self.log_progress(),
            }
        }
        debug!("Trace source ended");
        Ok(())
    }

    fn log_progress(&self) {
        info!(
            "Progress: {} lines ({} events), {} send / {} recv samples, {} round trips",
            self.collector.lines_read(),
            self.correlator.events_seen(),
            self.correlator.send_stats().count,
            self.correlator.recv_stats().count,
            self.collector.round_trips()
        );
    }

    /// Aggregated metrics so far
    pub fn metrics(
        &self,
        elapsed_secs: u64,
        overhead: Option<OverheadMeasurement>,
    ) -> LatencyMetrics {
        self.collector
            .generate_metrics(&self.correlator, elapsed_secs, overhead)
    }

    pub fn correlator(&self) -> &Correlator<'a> {
        &self.correlator
    }

    pub fn reporter(&self) -> &SampleReporter<W> {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservationPoint;
    use std::collections::VecDeque;

    struct VecSource(VecDeque<String>);

    impl LineSource for VecSource {
        async fn next_line(&mut self) -> Result<Option<String>> {
            Ok(self.0.pop_front())
        }
    }

    fn config() -> HopConfig {
        HopConfig {
            in_outer: ObservationPoint::new("eth0", "netif_receive_skb"),
            in_inner: ObservationPoint::new("veth0", "netif_rx"),
            out_inner: ObservationPoint::new("veth0", "net_dev_queue"),
            out_outer: ObservationPoint::new("eth0", "net_dev_xmit"),
        }
    }

    fn line(secs: u64, micros: u32, func: &str, dev: &str, skb: &str) -> String {
        format!(
            "           iperf-1234  [001] ..s1 {}.{:06}: {}: dev={} skbaddr={} len=98",
            secs, micros, func, dev, skb
        )
    }

    fn round_trip_lines() -> Vec<String> {
        vec![
            line(10, 100, "net_dev_queue", "veth0", "0xa"),
            "garbage that does not parse".to_string(),
            line(10, 140, "net_dev_xmit", "eth0", "0xa"),
            line(10, 500, "netif_receive_skb", "eth0", "0xb"),
            line(10, 525, "netif_rx", "veth0", "0xb"),
        ]
    }

    #[test]
    fn test_handle_lines() {
        let config = config();
        let mut processor = EventProcessor::new(
            &config,
            LineFormat::Pipe,
            0.0,
            SampleReporter::new(Vec::new(), false),
        );

        let outcomes: Vec<_> = round_trip_lines()
            .iter()
            .filter_map(|l| processor.handle_line(l).unwrap())
            .collect();
        assert_eq!(outcomes.len(), 2);

        let metrics = processor.metrics(1, None);
        assert_eq!(metrics.lines_read, 5);
        assert_eq!(metrics.unparsed_lines, 1);
        assert_eq!(metrics.send.mean_us, 40);
        assert_eq!(metrics.recv.mean_us, 25);
        assert_eq!(metrics.rtt.mean_us, 65);
        assert_eq!(metrics.rtt.samples, 1);

        let out = String::from_utf8(processor.reporter().get_ref().clone()).unwrap();
        assert_eq!(
            out,
            "[10.000525] rtt raw_latency: 65, events_overhead: 0.000000, adj_latency: 65.000000\n"
        );
    }

    #[tokio::test]
    async fn test_run_to_end_of_stream() {
        let config = config();
        let mut processor = EventProcessor::new(
            &config,
            LineFormat::Pipe,
            0.5,
            SampleReporter::new(Vec::new(), true),
        )
        .with_progress(Duration::from_secs(3600));
        let mut source = VecSource(round_trip_lines().into());

        processor.run(&mut source).await.unwrap();

        assert_eq!(processor.correlator().send_stats().count, 1);
        assert_eq!(processor.correlator().recv_stats().count, 1);
        let out = String::from_utf8(processor.reporter().get_ref().clone()).unwrap();
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_zero_progress_interval_disabled() {
        let config = config();
        let processor = EventProcessor::new(
            &config,
            LineFormat::Report,
            0.0,
            SampleReporter::new(Vec::new(), false),
        )
        .with_progress(Duration::ZERO);
        assert!(processor.progress_interval.is_none());
    }
}
