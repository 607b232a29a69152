//! Hop Latency Library
//!
//! Measures per-hop kernel latency of network packets from ftrace event
//! streams, optionally adjusted for the overhead the tracing itself adds.

pub mod collector;
pub mod config;
pub mod control;
pub mod correlator;
pub mod error;
pub mod events;
pub mod exporter;
pub mod overhead;
pub mod owamp;
pub mod parser;
pub mod probe;
pub mod source;
pub mod types;

pub use collector::MetricsCollector;
pub use config::{HopConfig, ObservationPoint};
pub use control::{ControlChannel, TracingControl, TracingSettings};
pub use correlator::{CorrelationOutcome, Correlator, Direction, LatencySample};
pub use error::{LatencyError, Result};
pub use events::EventProcessor;
pub use exporter::{ExporterType, JsonExporter, MetricsExporter, SampleReporter, TextExporter};
pub use overhead::{OverheadEstimator, OverheadMeasurement, OverheadSettings};
pub use parser::LineFormat;
pub use probe::ProbeSettings;
pub use source::{LineSource, TraceSource};
pub use types::*;
