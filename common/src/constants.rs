//! Shared constants for hop latency measurement
//!
//! These constants are used by the correlation engine, the overhead
//! estimator and the CLI defaults to keep behavior consistent.

// ============================================================================
// Correlation Limits
// ============================================================================

/// Maximum raw latency accepted as a sample (microseconds)
/// Deltas above this are reported as outliers and discarded
pub const MAX_RAW_LATENCY_US: u64 = 1_000_000;

/// Microseconds per second
pub const MICROS_PER_SEC: u64 = 1_000_000;

// ============================================================================
// Tracing Filesystem
// ============================================================================

/// Default mount point of the tracing filesystem
pub const DEFAULT_TRACING_PATH: &str = "/sys/kernel/debug/tracing";

/// Default trace clock (consistent across CPUs)
pub const DEFAULT_TRACE_CLOCK: &str = "global";

/// Seconds to wait after enabling tracing before events actually flow
pub const TRACING_SETTLE_SECS: u64 = 3;

// ============================================================================
// Overhead Probing
// ============================================================================

/// Number of loopback probes used to estimate tracing overhead
pub const OVERHEAD_NPROBES: u32 = 10;

/// UDP port used for loopback probes
pub const PROBE_PORT: u16 = 34128;

/// Payload carried by each loopback probe
pub const PROBE_PAYLOAD: &[u8] = b"This is a probe";

/// Receive buffer size for probe replies
pub const PROBE_BUFFER_LEN: usize = 128;

/// Default pause between probe rounds (milliseconds)
pub const PROBE_INTERVAL_MS: u64 = 1_000;

/// Maximum wait for a probe reply (seconds)
pub const PROBE_REPLY_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Trace Markers
// ============================================================================

/// Event name the kernel gives to lines written through trace_marker
pub const TRACE_MARK_WRITE: &str = "tracing_mark_write: ";

/// Prefix of the marker written before a probe is sent
pub const SEND_MARK: &str = "send ";

/// Prefix of the marker written after a probe reply is received
pub const RECV_MARK: &str = "recv ";

// ============================================================================
// Summary
// ============================================================================

/// Most recent round trips kept for percentiles and standard deviation
pub const RTT_WINDOW_SAMPLES: usize = 100_000;

// ============================================================================
// Histogram Buckets (in microseconds)
// ============================================================================

/// Histogram bucket boundary: 0-50us
pub const HISTOGRAM_BUCKET_50US: u64 = 50;

/// Histogram bucket boundary: 50-100us
pub const HISTOGRAM_BUCKET_100US: u64 = 100;

/// Histogram bucket boundary: 100-250us
pub const HISTOGRAM_BUCKET_250US: u64 = 250;

/// Histogram bucket boundary: 250-500us
pub const HISTOGRAM_BUCKET_500US: u64 = 500;

/// Histogram bucket boundary: 500us-1ms
pub const HISTOGRAM_BUCKET_1MS: u64 = 1_000;
