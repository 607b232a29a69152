//! Tracing overhead estimation
//!
//! Measures loopback RTT once with tracing off and once with tracing on,
//! while a reader task counts how many trace lines appear between the
//! `send <i>` and `recv <i>` markers of each round. The RTT increase
//! divided by the mean event count gives microseconds per event.
//!
//! Must be started with tracing disabled for the baseline to mean
//! anything.

use crate::{
    control::{ControlChannel, TracingSettings},
    error::{LatencyError, Result},
    probe::{probe_loopback, ProbeSettings},
    source::LineSource,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::{
    sync::oneshot,
    time::{sleep, timeout},
};
use trace_common::{RECV_MARK, SEND_MARK, TRACE_MARK_WRITE};

/// Marker written around one probe round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Send(u32),
    Recv(u32),
}

/// Recognize a marker line emitted through `trace_marker`
pub fn parse_marker(line: &str) -> Option<Marker> {
    let (_, text) = line.split_once(TRACE_MARK_WRITE)?;
    if let Some(index) = text.strip_prefix(SEND_MARK) {
        index.trim().parse().ok().map(Marker::Send)
    } else if let Some(index) = text.strip_prefix(RECV_MARK) {
        index.trim().parse().ok().map(Marker::Recv)
    } else {
        None
    }
}

/// Events counted between paired markers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCount {
    /// Rounds whose send and recv markers were both seen
    pub rounds: u32,
    /// Lines counted over those rounds
    pub events: u64,
}

impl EventCount {
    /// Mean events per matched round, 0 when nothing matched
    pub fn mean(&self) -> f64 {
        if self.rounds == 0 {
            0.0
        } else {
            self.events as f64 / self.rounds as f64
        }
    }
}

/// Count trace lines per probe round until the last round's recv marker
///
/// Every line bumps the counter; a send marker resets it; a recv marker
/// matching the last send index adds it (marker line included) to the sum.
pub async fn count_marked_events<S: LineSource>(
    source: &mut S,
    rounds: u32,
) -> Result<EventCount> {
    let mut count = EventCount::default();
    let mut current: Option<u32> = None;
    let mut counter: u64 = 0;

    while let Some(line) = source.next_line().await? {
        counter += 1;
        match parse_marker(&line) {
            Some(Marker::Send(index)) => {
                counter = 0;
                current = Some(index);
            }
            Some(Marker::Recv(index)) => {
                if current == Some(index) {
                    debug!("round {}: {} events", index, counter);
                    count.rounds += 1;
                    count.events += counter;
                }
                if index >= rounds.saturating_sub(1) {
                    return Ok(count);
                }
            }
            None => {}
        }
    }

    warn!("Trace stream ended before the final probe marker");
    Ok(count)
}

/// Microseconds of tracing artifact per event
///
/// Never negative: a traced RTT at or below the baseline is noise and
/// yields 0, as does a zero event count.
pub fn overhead_per_event(baseline_rtt_us: f64, traced_rtt_us: f64, mean_events: f64) -> f64 {
    if traced_rtt_us > baseline_rtt_us && mean_events > 0.0 {
        (traced_rtt_us - baseline_rtt_us) / mean_events
    } else {
        0.0
    }
}

/// Estimator parameters
#[derive(Debug, Clone)]
pub struct OverheadSettings {
    pub probe: ProbeSettings,
    /// Events traced during the measurement
    pub tracing: TracingSettings,
    /// Wait after enabling tracing before probing
    pub settle_delay: Duration,
    /// Give up on the event counter after this long, `None` waits forever
    pub reader_timeout: Option<Duration>,
}

/// Result of one estimation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverheadMeasurement {
    pub baseline_rtt_us: f64,
    pub traced_rtt_us: f64,
    pub mean_events_per_round: f64,
    pub usec_per_event: f64,
}

/// Two-phase overhead estimator
pub struct OverheadEstimator<'c, C: ControlChannel> {
    control: &'c C,
    settings: OverheadSettings,
}

impl<'c, C: ControlChannel> OverheadEstimator<'c, C> {
    pub fn new(control: &'c C, settings: OverheadSettings) -> Self {
        Self { control, settings }
    }

    /// Run the baseline and traced phases
    ///
    /// Tracing is released before returning, whatever the outcome.
    pub async fn estimate(&self) -> Result<OverheadMeasurement> {
        info!("Measuring untraced loopback RTT...");
        let baseline_rtt_us = probe_loopback::<C>(&self.settings.probe, None).await?;
        info!("   Untraced RTT: {:.1} us", baseline_rtt_us);

        self.control.start(&self.settings.tracing)?;
        let result = self.traced_phase(baseline_rtt_us).await;
        if let Err(e) = self.control.release() {
            warn!("Failed to release tracing: {}", e);
        }
        result
    }

    async fn traced_phase(&self, baseline_rtt_us: f64) -> Result<OverheadMeasurement> {
        let mut source = self.control.open_source().await?;

        // Tracing takes a moment to actually start emitting events
        sleep(self.settings.settle_delay).await;

        let rounds = self.settings.probe.rounds;
        let (tx, rx) = oneshot::channel();
        let reader = tokio::spawn(async move {
            let _ = tx.send(count_marked_events(&mut source, rounds).await);
        });

        info!("Measuring traced loopback RTT...");
        let traced_rtt_us = match probe_loopback(&self.settings.probe, Some(self.control)).await {
            Ok(rtt) => rtt,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        info!("   Traced RTT: {:.1} us", traced_rtt_us);

        let received = match self.settings.reader_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    reader.abort();
                    return Err(LatencyError::ReaderTimeout { waited: limit });
                }
            },
            None => rx.await,
        };
        let count = received.map_err(|_| LatencyError::ReaderLost)??;
        if let Err(e) = reader.await {
            debug!("event counter join: {}", e);
        }

        let mean_events_per_round = count.mean();
        info!(
            "   Events per round: {:.1} over {} rounds",
            mean_events_per_round, count.rounds
        );

        Ok(OverheadMeasurement {
            baseline_rtt_us,
            traced_rtt_us,
            mean_events_per_round,
            usec_per_event: overhead_per_event(
                baseline_rtt_us,
                traced_rtt_us,
                mean_events_per_round,
            ),
        })
    }
}
