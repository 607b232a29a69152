//! Shared data structures
//!
//! A `TraceEvent` is produced from one raw trace line and consumed
//! immediately by the correlation engine. All text fields are owned
//! copies so the reader is free to reuse its line buffer.

use core::fmt;

use crate::constants::MICROS_PER_SEC;

/// Point in time with microsecond resolution
///
/// Ordering compares seconds first, then microseconds. The microsecond
/// part is trusted to be below one million as printed by the tracer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Whole seconds
    pub secs: u64,
    /// Microseconds within the second
    pub micros: u64,
}

impl Timestamp {
    pub const fn new(secs: u64, micros: u64) -> Self {
        Self { secs, micros }
    }

    /// Build a timestamp from a total number of microseconds
    pub const fn from_micros(total: u64) -> Self {
        Self {
            secs: total / MICROS_PER_SEC,
            micros: total % MICROS_PER_SEC,
        }
    }

    /// Convert an OWAMP 64-bit fixed point value
    ///
    /// The upper 32 bits hold seconds, the lower 32 bits a binary
    /// fraction of a second which is scaled to microseconds.
    pub const fn from_owamp_num64(value: u64) -> Self {
        let secs = value >> 32;
        let micros = ((value & 0xFFFF_FFFF) * MICROS_PER_SEC) >> 32;
        Self::from_micros(secs * MICROS_PER_SEC + micros)
    }

    /// Total microseconds (saturating)
    pub const fn as_micros(&self) -> u64 {
        self.secs
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(self.micros)
    }

    /// Microseconds elapsed since `earlier`
    ///
    /// Returns `None` when `earlier` lies after `self`.
    pub const fn checked_micros_since(&self, earlier: &Timestamp) -> Option<u64> {
        self.as_micros().checked_sub(earlier.as_micros())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// One structured record parsed from a kernel trace line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceEvent {
    /// When the event fired
    pub timestamp: Timestamp,
    /// Event or function identifier (e.g. `net_dev_xmit`)
    pub function: String,
    /// Network device, if the event carries one
    pub device: Option<String>,
    /// Opaque packet buffer handle, compared for equality only
    pub skbaddr: Option<String>,
    /// Packet length, or syscall return value for exit events
    pub length: Option<i64>,
    /// Process id of the task that hit the event
    pub pid: Option<i32>,
}

impl TraceEvent {
    /// True if the event carries a device starting with `prefix`
    ///
    /// An absent device never matches.
    pub fn device_matches(&self, prefix: &str) -> bool {
        self.device
            .as_deref()
            .is_some_and(|dev| dev.starts_with(prefix))
    }

    /// True if the function name starts with `prefix`
    pub fn function_matches(&self, prefix: &str) -> bool {
        !self.function.is_empty() && self.function.starts_with(prefix)
    }

    /// True if both events carry the same packet buffer handle
    pub fn same_skb(&self, skbaddr: &str) -> bool {
        self.skbaddr.as_deref() == Some(skbaddr)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.function)?;
        if let Some(dev) = &self.device {
            write!(f, " dev={}", dev)?;
        }
        if let Some(skb) = &self.skbaddr {
            write!(f, " skbaddr={}", skb)?;
        }
        if let Some(len) = self.length {
            write!(f, " len={}", len)?;
        }
        if let Some(pid) = self.pid {
            write!(f, " pid={}", pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_since() {
        let start = Timestamp::new(10, 999_900);
        let finish = Timestamp::new(11, 100);

        assert_eq!(finish.checked_micros_since(&start), Some(200));
        assert_eq!(start.checked_micros_since(&finish), None);
        assert_eq!(start.checked_micros_since(&start), Some(0));
    }

    #[test]
    fn test_from_micros() {
        let ts = Timestamp::from_micros(3_000_042);
        assert_eq!(ts, Timestamp::new(3, 42));
        assert_eq!(ts.to_string(), "3.000042");
    }

    #[test]
    fn test_owamp_conversion() {
        // 2 seconds and one half second in 32-bit binary fraction
        let value = (2u64 << 32) | 0x8000_0000;
        assert_eq!(Timestamp::from_owamp_num64(value), Timestamp::new(2, 500_000));
    }

    #[test]
    fn test_absent_device_never_matches() {
        let event = TraceEvent {
            function: "net_dev_xmit".to_string(),
            ..Default::default()
        };

        assert!(!event.device_matches("eth0"));
        assert!(!event.device_matches(""));
        assert!(event.function_matches("net_dev"));
        assert!(!event.same_skb("0xdead"));
    }

    #[test]
    fn test_prefix_match_uses_configured_length() {
        let event = TraceEvent {
            device: Some("veth1234".to_string()),
            ..Default::default()
        };

        assert!(event.device_matches("veth"));
        assert!(event.device_matches("veth1234"));
        assert!(!event.device_matches("veth12345"));
        assert!(!event.device_matches("eth"));
    }
}
