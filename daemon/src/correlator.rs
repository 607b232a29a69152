//! Correlation of trace events into latency samples
//!
//! Matches events seen at the four configured observation points into
//! send and receive latency samples. A single alternating phase gates
//! the two sub-protocols so only one packet is in flight at a time,
//! matching a request/reply probing discipline:
//!
//! ```text
//! AwaitingSend:  out_inner (mark) ──skb──> out_outer (confirm) ─┐
//!      ^                                                        v
//!      └──── in_inner (confirm) <──skb── in_outer (mark) :AwaitingRecv
//! ```
//!
//! While a mark is pending, every event increments its since-mark
//! counter so the tracing overhead adjustment scales with the number of
//! trace lines emitted inside the measured window.

use crate::config::{HopConfig, ObservationPoint};
use log::{debug, trace};
use serde::Serialize;
use std::fmt;
use trace_common::{Timestamp, TraceEvent, MAX_RAW_LATENCY_US};

/// Direction of a measured hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Recv => write!(f, "recv"),
        }
    }
}

/// One accepted latency measurement
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub direction: Direction,
    /// Timestamp of the confirming event
    pub timestamp: Timestamp,
    /// Raw latency between mark and confirmation (microseconds)
    pub raw_us: u64,
    /// Events observed in the window, both endpoints included
    pub events: u32,
    /// Estimated tracing overhead inside the window (microseconds)
    pub overhead_us: f64,
    /// Raw latency minus overhead (microseconds)
    pub adjusted_us: f64,
}

/// A send sample combined with its matching receive sample
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub timestamp: Timestamp,
    pub raw_us: u64,
    pub overhead_us: f64,
    pub adjusted_us: f64,
}

impl RoundTrip {
    fn combine(send: &LatencySample, recv: &LatencySample) -> Self {
        Self {
            timestamp: recv.timestamp,
            raw_us: send.raw_us + recv.raw_us,
            overhead_us: send.overhead_us + recv.overhead_us,
            adjusted_us: send.adjusted_us + recv.adjusted_us,
        }
    }
}

/// Result of feeding one event to the correlator
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationOutcome {
    /// Send hop accepted, now waiting for the reply
    Send(LatencySample),
    /// Receive hop accepted, completing a round trip
    RoundTrip { recv: LatencySample, rtt: RoundTrip },
    /// Delta above the raw latency limit, discarded
    Outlier { direction: Direction, raw_us: u64 },
    /// Confirmation timestamped before its mark, discarded
    OutOfOrder { direction: Direction },
}

/// Running sums for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStatistics {
    /// Sum of accepted raw latencies (microseconds)
    pub sum_us: u64,
    /// Sum of accepted adjusted latencies (microseconds)
    pub adjusted_sum_us: f64,
    /// Number of accepted samples
    pub count: u64,
    /// Number of discarded samples
    pub discarded: u64,
}

impl LatencyStatistics {
    pub fn record(&mut self, sample: &LatencySample) {
        self.sum_us += sample.raw_us;
        self.adjusted_sum_us += sample.adjusted_us;
        self.count += 1;
    }

    /// Mean raw latency in whole microseconds, 0 without samples
    pub fn mean_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum_us / self.count
        }
    }

    /// Mean adjusted latency in microseconds, 0 without samples
    pub fn adjusted_mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.adjusted_sum_us / self.count as f64
        }
    }
}

/// Which sub-protocol is active
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    AwaitingSend,
    /// A send hop was accepted; its sample is kept for the round trip
    AwaitingRecv { send: LatencySample },
}

impl Phase {
    pub fn direction(&self) -> Direction {
        match self {
            Phase::AwaitingSend => Direction::Send,
            Phase::AwaitingRecv { .. } => Direction::Recv,
        }
    }
}

/// First observation of the packet currently in flight
#[derive(Debug, Clone)]
struct PendingMark {
    skbaddr: String,
    start: Timestamp,
    events_since_mark: u32,
}

/// Correlation state machine
pub struct Correlator<'a> {
    config: &'a HopConfig,
    usec_per_event: f64,
    phase: Phase,
    send_pending: Option<PendingMark>,
    recv_pending: Option<PendingMark>,
    send_stats: LatencyStatistics,
    recv_stats: LatencyStatistics,
    events_seen: u64,
}

impl<'a> Correlator<'a> {
    /// Create a correlator
    ///
    /// # Arguments
    ///
    /// * `config` - Observation points of the measured path
    /// * `usec_per_event` - Tracing overhead per event, 0 to disable adjustment
    pub fn new(config: &'a HopConfig, usec_per_event: f64) -> Self {
        Self {
            config,
            usec_per_event: usec_per_event.max(0.0),
            phase: Phase::AwaitingSend,
            send_pending: None,
            recv_pending: None,
            send_stats: LatencyStatistics::default(),
            recv_stats: LatencyStatistics::default(),
            events_seen: 0,
        }
    }

    /// Feed one event, returning at most one outcome
    pub fn process(&mut self, event: &TraceEvent) -> Option<CorrelationOutcome> {
        self.events_seen += 1;

        let direction = self.phase.direction();
        let (mark_point, confirm_point) = self.points(direction);

        let pending = match direction {
            Direction::Send => &mut self.send_pending,
            Direction::Recv => &mut self.recv_pending,
        };

        if let Some(mark) = pending.as_mut() {
            mark.events_since_mark += 1;

            if matches_point(event, confirm_point) && event.same_skb(&mark.skbaddr) {
                let mark = pending.take()?;
                return Some(self.confirm(direction, mark, event));
            }
        }

        if matches_point(event, mark_point) {
            match &event.skbaddr {
                Some(skbaddr) => {
                    if let Some(old) = pending.as_ref() {
                        debug!("{} mark for {} replaced by {}", direction, old.skbaddr, skbaddr);
                    }
                    *pending = Some(PendingMark {
                        skbaddr: skbaddr.clone(),
                        start: event.timestamp,
                        events_since_mark: 1,
                    });
                }
                None => trace!("{} mark without skbaddr ignored: {}", direction, event),
            }
        }

        None
    }

    fn points(&self, direction: Direction) -> (&'a ObservationPoint, &'a ObservationPoint) {
        let config = self.config;
        match direction {
            Direction::Send => (&config.out_inner, &config.out_outer),
            Direction::Recv => (&config.in_outer, &config.in_inner),
        }
    }

    fn confirm(
        &mut self,
        direction: Direction,
        mark: PendingMark,
        event: &TraceEvent,
    ) -> CorrelationOutcome {
        let raw_us = match event.timestamp.checked_micros_since(&mark.start) {
            Some(raw_us) if raw_us <= MAX_RAW_LATENCY_US => raw_us,
            rejected => {
                self.stats_mut(direction).discarded += 1;
                // A lost reply abandons the whole round trip
                self.phase = Phase::AwaitingSend;
                return match rejected {
                    Some(raw_us) => CorrelationOutcome::Outlier { direction, raw_us },
                    None => CorrelationOutcome::OutOfOrder { direction },
                };
            }
        };

        let overhead_us = mark.events_since_mark as f64 * self.usec_per_event;
        let sample = LatencySample {
            direction,
            timestamp: event.timestamp,
            raw_us,
            events: mark.events_since_mark,
            overhead_us,
            adjusted_us: raw_us as f64 - overhead_us,
        };
        self.stats_mut(direction).record(&sample);

        match std::mem::replace(&mut self.phase, Phase::AwaitingSend) {
            Phase::AwaitingSend => {
                debug!("send accepted ({} us), awaiting reply", raw_us);
                self.phase = Phase::AwaitingRecv {
                    send: sample.clone(),
                };
                CorrelationOutcome::Send(sample)
            }
            Phase::AwaitingRecv { send } => {
                debug!("recv accepted ({} us), round trip complete", raw_us);
                let rtt = RoundTrip::combine(&send, &sample);
                CorrelationOutcome::RoundTrip { recv: sample, rtt }
            }
        }
    }

    fn stats_mut(&mut self, direction: Direction) -> &mut LatencyStatistics {
        match direction {
            Direction::Send => &mut self.send_stats,
            Direction::Recv => &mut self.recv_stats,
        }
    }

    /// Currently active phase
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Packet handle awaiting confirmation in the given direction
    pub fn pending_skbaddr(&self, direction: Direction) -> Option<&str> {
        let pending = match direction {
            Direction::Send => &self.send_pending,
            Direction::Recv => &self.recv_pending,
        };
        pending.as_ref().map(|m| m.skbaddr.as_str())
    }

    pub fn send_stats(&self) -> &LatencyStatistics {
        &self.send_stats
    }

    pub fn recv_stats(&self) -> &LatencyStatistics {
        &self.recv_stats
    }

    /// Mean round trip: send mean plus receive mean
    pub fn rtt_mean_us(&self) -> u64 {
        self.send_stats.mean_us() + self.recv_stats.mean_us()
    }

    /// Number of events processed
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Overhead per event used for adjustment
    pub fn usec_per_event(&self) -> f64 {
        self.usec_per_event
    }
}

fn matches_point(event: &TraceEvent, point: &ObservationPoint) -> bool {
    event.function_matches(&point.function) && event.device_matches(&point.device)
}
