//! Error types for hop latency measurement
//!
//! Unparseable lines and outlier samples are expected in a live trace
//! stream and are not represented here: the parser yields `None` and the
//! correlator reports outliers as a regular outcome.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, LatencyError>;

#[derive(Debug, Error)]
pub enum LatencyError {
    // =========================================================================
    // Configuration Errors - fatal before any measurement starts
    // =========================================================================
    #[error("Incomplete configuration, missing: {}", missing.join(", "))]
    ConfigIncomplete { missing: Vec<&'static str> },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // =========================================================================
    // Tracing Control Errors
    // =========================================================================
    /// The first write into the tracing filesystem failed, usually a
    /// permission problem
    #[error("Cannot write to tracing filesystem at {path:?} (are you root?): {source}")]
    ControlChannelDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write tracing setting '{setting}': {source}")]
    ControlWrite {
        setting: String,
        #[source]
        source: io::Error,
    },

    // =========================================================================
    // Trace Source Errors
    // =========================================================================
    #[error("Cannot open trace source {path:?}: {source}")]
    TraceSourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from trace source: {0}")]
    TraceRead(#[source] io::Error),

    // =========================================================================
    // Overhead Probing Errors
    // =========================================================================
    #[error("Probe transport failure in round {round}: {source}")]
    ProbeTransport {
        round: u32,
        #[source]
        source: io::Error,
    },

    #[error("Event counter saw no final marker within {waited:?}")]
    ReaderTimeout { waited: Duration },

    #[error("Event counter task ended without reporting")]
    ReaderLost,

    #[error("Malformed OWAMP record: {message}")]
    OwampRecord { message: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl LatencyError {
    /// True for errors that prevent any tracing-based measurement
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            LatencyError::ConfigIncomplete { .. }
                | LatencyError::ConfigInvalid { .. }
                | LatencyError::ControlChannelDenied { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_incomplete_lists_missing_keys() {
        let err = LatencyError::ConfigIncomplete {
            missing: vec!["in_outer_dev", "out_outer_func"],
        };

        assert_eq!(
            err.to_string(),
            "Incomplete configuration, missing: in_outer_dev, out_outer_func"
        );
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn test_transport_failure_is_not_setup_error() {
        let err = LatencyError::ProbeTransport {
            round: 3,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };

        assert!(!err.is_fatal_setup());
        assert!(err.to_string().contains("round 3"));
    }
}
