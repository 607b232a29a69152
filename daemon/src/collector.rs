//! Metrics collection and aggregation
//!
//! Aggregates correlation outcomes into round-trip statistics and
//! builds the final summary. Counts, histogram and min/max cover every
//! round trip; percentiles and standard deviation cover a bounded window
//! of the most recent ones.

use crate::{
    correlator::{CorrelationOutcome, Correlator},
    overhead::OverheadMeasurement,
    types::*,
};
use std::collections::VecDeque;
use trace_common::RTT_WINDOW_SAMPLES;

/// Metrics collector for correlation outcomes
pub struct MetricsCollector {
    /// Most recent raw round trips (for percentile calculation)
    rtt_window: VecDeque<f64>,
    /// Maximum length of `rtt_window`
    window_len: usize,
    /// Raw round-trip histogram
    histogram: LatencyHistogram,
    min_us: f64,
    max_us: f64,
    /// Total number of lines read
    lines_read: u64,
    /// Lines that did not parse
    unparsed_lines: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_window(RTT_WINDOW_SAMPLES)
    }

    /// Keep at most `window_len` round trips for percentiles
    pub fn with_window(window_len: usize) -> Self {
        let window_len = window_len.max(1);
        Self {
            rtt_window: VecDeque::with_capacity(window_len.min(1024)),
            window_len,
            histogram: LatencyHistogram::default(),
            min_us: f64::INFINITY,
            max_us: f64::NEG_INFINITY,
            lines_read: 0,
            unparsed_lines: 0,
        }
    }

    /// Count one input line
    pub fn add_line(&mut self, parsed: bool) {
        self.lines_read += 1;
        if !parsed {
            self.unparsed_lines += 1;
        }
    }

    /// Add a correlation outcome to the collector
    pub fn add_outcome(&mut self, outcome: &CorrelationOutcome) {
        if let CorrelationOutcome::RoundTrip { rtt, .. } = outcome {
            let latency_us = rtt.raw_us as f64;
            if self.rtt_window.len() == self.window_len {
                self.rtt_window.pop_front();
            }
            self.rtt_window.push_back(latency_us);
            self.histogram.add_sample(latency_us);
            self.min_us = self.min_us.min(latency_us);
            self.max_us = self.max_us.max(latency_us);
        }
    }

    /// Generate aggregated metrics
    ///
    /// # Arguments
    ///
    /// * `correlator` - Engine holding the per-direction statistics
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `overhead` - Estimator result, if it ran
    pub fn generate_metrics(
        &self,
        correlator: &Correlator<'_>,
        elapsed_secs: u64,
        overhead: Option<OverheadMeasurement>,
    ) -> LatencyMetrics {
        let send = DirectionMetrics::from(correlator.send_stats());
        let recv = DirectionMetrics::from(correlator.recv_stats());

        let samples: Vec<f64> = self.rtt_window.iter().copied().collect();
        let (min, max, std_dev) = if samples.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            (self.min_us, self.max_us, calculate_std_dev(&samples, avg))
        };

        let rtt = RoundTripMetrics {
            samples: self.round_trips(),
            mean_us: correlator.rtt_mean_us(),
            adjusted_mean_us: send.adjusted_mean_us + recv.adjusted_mean_us,
            min_us: min,
            max_us: max,
            std_dev_us: std_dev,
            histogram: self.histogram.clone(),
            percentiles: calculate_percentiles(samples),
        };

        LatencyMetrics {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            lines_read: self.lines_read,
            unparsed_lines: self.unparsed_lines,
            usec_per_event: correlator.usec_per_event(),
            send,
            recv,
            rtt,
            overhead,
        }
    }

    /// Get current line count
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Get number of completed round trips
    pub fn round_trips(&self) -> u64 {
        self.histogram.total_count()
    }

    /// Get histogram reference
    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }
}
