//! OWAMP raw record conversion
//!
//! Each record is `seq send_time send_sync send_err recv_time recv_sync
//! recv_err ttl` with both times as 64-bit fixed point values (upper 32
//! bits seconds, lower 32 bits binary fraction).

use crate::error::{LatencyError, Result};
use trace_common::Timestamp;

/// One OWAMP packet record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwampRecord {
    pub seq: u32,
    pub send_time: u64,
    pub send_sync: bool,
    pub send_err: f32,
    pub recv_time: u64,
    pub recv_sync: bool,
    pub recv_err: f32,
    pub ttl: u32,
}

impl OwampRecord {
    /// Parse a whitespace separated record
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(invalid(format!(
                "expected 8 fields, got {}: {:?}",
                fields.len(),
                line
            )));
        }

        Ok(Self {
            seq: number(fields[0], "seq")?,
            send_time: number(fields[1], "send_time")?,
            send_sync: number::<u8>(fields[2], "send_sync")? != 0,
            send_err: number(fields[3], "send_err")?,
            recv_time: number(fields[4], "recv_time")?,
            recv_sync: number::<u8>(fields[5], "recv_sync")? != 0,
            recv_err: number(fields[6], "recv_err")?,
            ttl: number(fields[7], "ttl")?,
        })
    }

    /// Whole seconds of the send time
    pub fn send_secs(&self) -> u64 {
        self.send_time >> 32
    }

    /// One-way delay, `None` when the receive time precedes the send time
    pub fn delay(&self) -> Option<Timestamp> {
        self.recv_time
            .checked_sub(self.send_time)
            .map(Timestamp::from_owamp_num64)
    }
}

fn number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T> {
    text.parse()
        .map_err(|_| invalid(format!("bad {} value {:?}", name, text)))
}

fn invalid(message: String) -> LatencyError {
    LatencyError::OwampRecord { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF_SECOND: u64 = 1 << 31;

    #[test]
    fn test_parse_record() {
        let send = (1_700_000_000u64 << 32) | 0x1000;
        let recv = send + HALF_SECOND;
        let line = format!("7 {} 1 0.000123 {} 1 0.0002 255", send, recv);

        let record = OwampRecord::parse(&line).unwrap();
        assert_eq!(record.seq, 7);
        assert!(record.send_sync);
        assert_eq!(record.ttl, 255);
        assert_eq!(record.send_secs(), 1_700_000_000);
        assert_eq!(record.delay(), Some(Timestamp::new(0, 500_000)));
    }

    #[test]
    fn test_negative_delay() {
        let record = OwampRecord::parse("1 2000 0 0 1000 0 0 64").unwrap();
        assert_eq!(record.delay(), None);
    }

    #[test]
    fn test_malformed_records() {
        assert!(OwampRecord::parse("").is_err());
        assert!(OwampRecord::parse("1 2 3").is_err());
        assert!(OwampRecord::parse("x 2000 0 0 1000 0 0 64").is_err());
    }
}
