//! Heartbeat pump: transport-level pings with pong accounting.
//!
//! The read pump records every pong in a shared [`PongTracker`]. This pump
//! sends a ping each interval and waits for the tracker to move. It gives
//! up and reports a [`HeartbeatVerdict`] after too many consecutive misses
//! or when the last pong is older than the stale window.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use craftlink_protocol::constants::{
    MSMP_HEARTBEAT_INTERVAL, MSMP_HEARTBEAT_SETTLE, MSMP_HEARTBEAT_STALE,
    MSMP_MAX_HEARTBEAT_FAILURES, MSMP_PONG_WAIT,
};

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Delay between connect and the first ping.
    pub settle: Duration,
    pub interval: Duration,
    pub pong_wait: Duration,
    /// Link is dead once the last pong is older than this.
    pub stale_after: Duration,
    pub max_failures: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            settle: MSMP_HEARTBEAT_SETTLE,
            interval: MSMP_HEARTBEAT_INTERVAL,
            pong_wait: MSMP_PONG_WAIT,
            stale_after: MSMP_HEARTBEAT_STALE,
            max_failures: MSMP_MAX_HEARTBEAT_FAILURES,
        }
    }
}

/// Why the heartbeat declared the link dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatVerdict {
    MissedPongs(u32),
    Stale(Duration),
}

/// Last-pong timestamp plus a counter the heartbeat can wait on.
pub(crate) struct PongTracker {
    last: Mutex<Instant>,
    seq: watch::Sender<u64>,
}

impl PongTracker {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
            seq: watch::channel(0).0,
        }
    }

    /// Called by the read pump for every pong.
    pub(crate) fn record(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.seq.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Starts a fresh stale window without counting a pong.
    pub(crate) fn reset(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn since_last(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.seq.subscribe()
    }
}

/// Runs until cancelled, the outbound queue closes, or the link is judged
/// dead. Only the last case returns a verdict.
pub(crate) async fn heartbeat_pump(
    outbound: mpsc::Sender<tungstenite::Message>,
    pongs: std::sync::Arc<PongTracker>,
    settings: HeartbeatSettings,
    cancel: CancellationToken,
) -> Option<HeartbeatVerdict> {
    tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = tokio::time::sleep(settings.settle) => {}
    }

    let mut pong_rx = pongs.subscribe();
    let mut failures: u32 = 0;

    loop {
        pong_rx.borrow_and_update();
        if outbound
            .send(tungstenite::Message::Ping(Vec::new().into()))
            .await
            .is_err()
        {
            return None;
        }

        let answered = tokio::select! {
            _ = cancel.cancelled() => return None,
            res = tokio::time::timeout(settings.pong_wait, pong_rx.changed()) => res,
        };

        match answered {
            Ok(Ok(())) => {
                failures = 0;
                trace!("heartbeat ok");
            }
            Ok(Err(_)) => return None,
            Err(_) => {
                failures += 1;
                warn!(
                    failures,
                    max = settings.max_failures,
                    "heartbeat pong timed out"
                );
                if failures >= settings.max_failures {
                    return Some(HeartbeatVerdict::MissedPongs(failures));
                }
                let since = pongs.since_last();
                if since > settings.stale_after {
                    warn!(secs = since.as_secs(), "no pong within stale window");
                    return Some(HeartbeatVerdict::Stale(since));
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }
}
