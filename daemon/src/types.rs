//! Summary type definitions
//!
//! Defines the data structures used to aggregate correlation results
//! and export the final summary.

use crate::{correlator::LatencyStatistics, overhead::OverheadMeasurement};
use serde::Serialize;
use trace_common::{
    HISTOGRAM_BUCKET_100US, HISTOGRAM_BUCKET_1MS, HISTOGRAM_BUCKET_250US, HISTOGRAM_BUCKET_500US,
    HISTOGRAM_BUCKET_50US,
};

pub use trace_common::{Timestamp, TraceEvent};

/// Aggregated metrics for one measurement run
#[derive(Serialize, Debug, Clone)]
pub struct LatencyMetrics {
    /// ISO 8601 timestamp when metrics were collected
    pub timestamp: String,
    /// Duration of collection period in seconds
    pub duration_seconds: u64,
    /// Trace lines read
    pub lines_read: u64,
    /// Lines that did not fit the trace grammar
    pub unparsed_lines: u64,
    /// Overhead per event used to adjust samples
    pub usec_per_event: f64,
    /// Outbound hop (inner device to wire)
    pub send: DirectionMetrics,
    /// Inbound hop (wire to inner device)
    pub recv: DirectionMetrics,
    /// Combined send + receive
    pub rtt: RoundTripMetrics,
    /// Estimator details, when it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overhead: Option<OverheadMeasurement>,
}

/// Metrics for one hop direction
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct DirectionMetrics {
    /// Accepted samples
    pub samples: u64,
    /// Outliers and out-of-order samples
    pub discarded: u64,
    /// Mean raw latency in microseconds
    pub mean_us: u64,
    /// Mean overhead-adjusted latency in microseconds
    pub adjusted_mean_us: f64,
}

impl From<&LatencyStatistics> for DirectionMetrics {
    fn from(stats: &LatencyStatistics) -> Self {
        Self {
            samples: stats.count,
            discarded: stats.discarded,
            mean_us: stats.mean_us(),
            adjusted_mean_us: stats.adjusted_mean_us(),
        }
    }
}

/// Round-trip metrics
#[derive(Serialize, Debug, Clone, Default)]
pub struct RoundTripMetrics {
    /// Completed round trips
    pub samples: u64,
    /// Send mean plus receive mean in microseconds
    pub mean_us: u64,
    /// Adjusted send mean plus adjusted receive mean
    pub adjusted_mean_us: f64,
    /// Minimum raw round trip in microseconds
    pub min_us: f64,
    /// Maximum raw round trip in microseconds
    pub max_us: f64,
    /// Standard deviation in microseconds
    pub std_dev_us: f64,
    /// Raw round-trip histogram
    pub histogram: LatencyHistogram,
    /// Raw round-trip percentiles
    pub percentiles: Percentiles,
}

/// Latency histogram buckets
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct LatencyHistogram {
    /// 0-50us bucket
    #[serde(rename = "0-50us")]
    pub bucket_0_50us: u64,
    /// 50-100us bucket
    #[serde(rename = "50-100us")]
    pub bucket_50_100us: u64,
    /// 100-250us bucket
    #[serde(rename = "100-250us")]
    pub bucket_100_250us: u64,
    /// 250-500us bucket
    #[serde(rename = "250-500us")]
    pub bucket_250_500us: u64,
    /// 500us-1ms bucket
    #[serde(rename = "500us-1ms")]
    pub bucket_500us_1ms: u64,
    /// 1ms+ bucket
    #[serde(rename = "1ms+")]
    pub bucket_1ms_plus: u64,
}

impl LatencyHistogram {
    /// Add a sample to the appropriate bucket
    ///
    /// # Arguments
    ///
    /// * `latency_us` - Latency in microseconds
    pub fn add_sample(&mut self, latency_us: f64) {
        match latency_us {
            l if l < HISTOGRAM_BUCKET_50US as f64 => self.bucket_0_50us += 1,
            l if l < HISTOGRAM_BUCKET_100US as f64 => self.bucket_50_100us += 1,
            l if l < HISTOGRAM_BUCKET_250US as f64 => self.bucket_100_250us += 1,
            l if l < HISTOGRAM_BUCKET_500US as f64 => self.bucket_250_500us += 1,
            l if l < HISTOGRAM_BUCKET_1MS as f64 => self.bucket_500us_1ms += 1,
            _ => self.bucket_1ms_plus += 1,
        }
    }

    /// Get total count across all buckets
    pub fn total_count(&self) -> u64 {
        self.bucket_0_50us
            + self.bucket_50_100us
            + self.bucket_100_250us
            + self.bucket_250_500us
            + self.bucket_500us_1ms
            + self.bucket_1ms_plus
    }
}

/// Latency percentiles
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

/// Calculate percentiles from a vector of samples
///
/// # Arguments
///
/// * `samples` - Vector of latency values (will be sorted in place)
///
/// # Returns
///
/// Percentiles structure with p50, p75, p90, p95, p99, p999
pub fn calculate_percentiles(mut samples: Vec<f64>) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }

    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let len = samples.len();

    let per_mille = |p: usize| {
        let index = std::cmp::min((len * p / 1000).saturating_sub(1), len - 1);
        samples[index]
    };

    Percentiles {
        p50: per_mille(500),
        p75: per_mille(750),
        p90: per_mille(900),
        p95: per_mille(950),
        p99: per_mille(990),
        p999: per_mille(999),
    }
}

/// Calculate population standard deviation
pub fn calculate_std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() <= 1 {
        return 0.0;
    }

    let variance: f64 = samples
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}
