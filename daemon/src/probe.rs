//! Loopback RTT probing
//!
//! Sends UDP datagrams to a socket bound on the loopback path and times
//! each round trip, putting packets through the netdev layer so tracing
//! overhead shows up in the RTT.

use crate::{
    control::ControlChannel,
    error::{LatencyError, Result},
};
use log::debug;
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::UdpSocket,
    time::{sleep, timeout, Instant},
};
use trace_common::{PROBE_BUFFER_LEN, PROBE_PAYLOAD, RECV_MARK, SEND_MARK};

/// Loopback probing parameters
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Address the probe socket binds to and sends to
    pub target: SocketAddr,
    /// Number of rounds; the first is a cache warmer and not averaged
    pub rounds: u32,
    /// Pause after each round
    pub interval: Duration,
    /// Maximum wait for a probe to come back
    pub reply_timeout: Duration,
}

/// Probe the loopback path and return the mean RTT in microseconds
///
/// When `markers` is given, `send <i>` is written before each probe and
/// `recv <i>` after its reply so a trace reader can delimit each round.
/// Any transport failure aborts the run; there is no retry.
pub async fn probe_loopback<C: ControlChannel>(
    settings: &ProbeSettings,
    markers: Option<&C>,
) -> Result<f64> {
    if settings.rounds < 2 {
        return Err(LatencyError::ConfigInvalid {
            message: format!("need at least 2 probe rounds, got {}", settings.rounds),
        });
    }

    let socket = UdpSocket::bind(settings.target)
        .await
        .map_err(|source| LatencyError::ProbeTransport { round: 0, source })?;
    let dest = socket
        .local_addr()
        .map_err(|source| LatencyError::ProbeTransport { round: 0, source })?;

    let mut reply = [0u8; PROBE_BUFFER_LEN];
    let mut rtt_sum_us: u64 = 0;

    for round in 0..settings.rounds {
        if let Some(control) = markers {
            control.mark(&format!("{}{}", SEND_MARK, round))?;
        }

        let sent_at = Instant::now();
        socket
            .send_to(PROBE_PAYLOAD, dest)
            .await
            .map_err(|source| LatencyError::ProbeTransport { round, source })?;

        let received = match timeout(settings.reply_timeout, socket.recv_from(&mut reply)).await {
            Ok(received) => received,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply within {:?}", settings.reply_timeout),
            )),
        };
        let (len, _) = received.map_err(|source| LatencyError::ProbeTransport { round, source })?;
        let rtt = sent_at.elapsed();

        if let Some(control) = markers {
            control.mark(&format!("{}{}", RECV_MARK, round))?;
        }

        // First round warms caches
        if round > 0 {
            rtt_sum_us += rtt.as_micros() as u64;
        }
        debug!("probe {}: {} bytes, rtt {:?}", round, len, rtt);

        if round + 1 < settings.rounds {
            sleep(settings.interval).await;
        }
    }

    Ok(rtt_sum_us as f64 / (settings.rounds - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TracingControl;

    fn settings(rounds: u32) -> ProbeSettings {
        ProbeSettings {
            target: "127.0.0.1:0".parse().unwrap(),
            rounds,
            interval: Duration::ZERO,
            reply_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_probe_loopback_mean() {
        let mean = probe_loopback::<TracingControl>(&settings(3), None)
            .await
            .unwrap();

        assert!(mean >= 0.0);
        assert!(mean < 1_000_000.0);
    }

    #[tokio::test]
    async fn test_probe_writes_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trace_marker"), "").unwrap();
        let control = TracingControl::new(dir.path());

        probe_loopback(&settings(2), Some(&control)).await.unwrap();

        let last = std::fs::read_to_string(dir.path().join("trace_marker")).unwrap();
        assert_eq!(last, "recv 1");
    }

    #[tokio::test]
    async fn test_marker_failure_aborts() {
        let control = TracingControl::new("/nonexistent/tracing");

        let err = probe_loopback(&settings(2), Some(&control)).await.unwrap_err();
        assert!(matches!(err, LatencyError::ControlWrite { .. }));
    }

    #[tokio::test]
    async fn test_single_round_rejected() {
        let err = probe_loopback::<TracingControl>(&settings(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LatencyError::ConfigInvalid { .. }));
    }
}
