//! Hop configuration
//!
//! Describes the four observation points a packet crosses: the inbound
//! path (outer device, then inner device) and the outbound path (inner
//! device, then outer device). Loaded once at startup and passed by
//! reference to the correlator.
//!
//! ## File format
//!
//! ```text
//! in_outer_dev:eth0
//! in_outer_func:netif_receive_skb
//! in_inner_dev:veth0
//! in_inner_func:netif_rx
//! out_inner_dev:veth0
//! out_inner_func:net_dev_queue
//! out_outer_dev:eth0
//! out_outer_func:net_dev_xmit
//! ```

use crate::error::{LatencyError, Result};
use log::debug;
use serde::Serialize;
use std::{fs, path::Path};

/// A named (device, function) pair where an event fires
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ObservationPoint {
    pub device: String,
    pub function: String,
}

impl ObservationPoint {
    pub fn new(device: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            function: function.into(),
        }
    }
}

/// Immutable configuration of the measured path
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HopConfig {
    /// Wire-facing device, packet reception
    pub in_outer: ObservationPoint,
    /// Inner device, packet reception (or timestamping point)
    pub in_inner: ObservationPoint,
    /// Inner device, packet sent by the application
    pub out_inner: ObservationPoint,
    /// Wire-facing device, packet leaves the kernel
    pub out_outer: ObservationPoint,
}

const KEYS: [&str; 8] = [
    "in_outer_dev",
    "in_outer_func",
    "in_inner_dev",
    "in_inner_func",
    "out_inner_dev",
    "out_inner_func",
    "out_outer_dev",
    "out_outer_func",
];

impl HopConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| LatencyError::ConfigInvalid {
            message: format!("cannot read {:?}: {}", path, e),
        })?;
        Self::parse(&text)
    }

    /// Parse `key:value` lines
    ///
    /// Lines without a colon and unknown keys are ignored. All eight keys
    /// must be present with a non-empty value.
    pub fn parse(text: &str) -> Result<Self> {
        let mut values: [Option<String>; 8] = Default::default();

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match KEYS.iter().position(|k| *k == key) {
                Some(idx) if !value.is_empty() => values[idx] = Some(value.to_string()),
                Some(_) => debug!("Ignoring empty value for '{}'", key),
                None => debug!("Ignoring unknown config key '{}'", key),
            }
        }

        let missing: Vec<&'static str> = KEYS
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(LatencyError::ConfigIncomplete { missing });
        }

        let [
            in_outer_dev,
            in_outer_func,
            in_inner_dev,
            in_inner_func,
            out_inner_dev,
            out_inner_func,
            out_outer_dev,
            out_outer_func,
        ] = values.map(Option::unwrap_or_default);

        Ok(Self {
            in_outer: ObservationPoint::new(in_outer_dev, in_outer_func),
            in_inner: ObservationPoint::new(in_inner_dev, in_inner_func),
            out_inner: ObservationPoint::new(out_inner_dev, out_inner_func),
            out_outer: ObservationPoint::new(out_outer_dev, out_outer_func),
        })
    }

    /// Space-separated event filter for the tracing subsystem
    pub fn trace_events(&self) -> String {
        [
            self.in_outer.function.as_str(),
            self.in_inner.function.as_str(),
            self.out_inner.function.as_str(),
            self.out_outer.function.as_str(),
        ]
        .join(" ")
    }

    /// Log the configuration for reference
    pub fn log_summary(&self) {
        use log::info;

        info!("   in_outer:  {} / {}", self.in_outer.device, self.in_outer.function);
        info!("   in_inner:  {} / {}", self.in_inner.device, self.in_inner.function);
        info!("   out_inner: {} / {}", self.out_inner.device, self.out_inner.function);
        info!("   out_outer: {} / {}", self.out_outer.device, self.out_outer.function);
        info!("   events:    {}", self.trace_events());
    }
}
