//! Keep-alive: periodic ping with a bounded wait for any inbound activity.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::peer::{Delivery, PeerHandle};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No frame arrived within `timeout` after a ping.
    TimedOut,
    /// The peer's writer is gone.
    Disconnected,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Ping `peer` every `interval` and wait up to `timeout` for activity.
///
/// Any inbound frame marks the peer alive (pongs included), so a chatty
/// client never times out. The first ping goes out one `interval` after start.
pub async fn run_heartbeat(
    peer: Arc<PeerHandle>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        // only activity after this ping counts
        let _ = peer.check_alive();
        if peer.send_within(Message::Ping(Vec::new().into()), timeout).await == Delivery::Closed {
            return HeartbeatResult::Disconnected;
        }

        tokio::select! {
            () = time::sleep(timeout) => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        if !peer.check_alive() {
            return HeartbeatResult::TimedOut;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::peer::test_support::peer;

    #[tokio::test(start_paused = true)]
    async fn cancelled() {
        let (p, _rx) = peer(1);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_heartbeat(
            p,
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel2,
        ));
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (p, mut rx) = peer(1);
        let result = run_heartbeat(
            p,
            Duration::from_millis(100),
            Duration::from_millis(50),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_stays_alive() {
        let (p, mut rx) = peer(1);
        let responder = Arc::clone(&p);
        let _echo = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if matches!(msg, Message::Ping(_)) {
                    responder.mark_alive();
                }
            }
        });

        let outcome = time::timeout(
            Duration::from_secs(5),
            run_heartbeat(
                p,
                Duration::from_millis(100),
                Duration::from_millis(50),
                CancellationToken::new(),
            ),
        )
        .await;
        assert!(outcome.is_err(), "heartbeat should still be running");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_is_disconnected() {
        let (p, rx) = peer(1);
        drop(rx);
        let result = run_heartbeat(
            p,
            Duration::from_millis(100),
            Duration::from_millis(50),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::Disconnected);
    }

    #[test]
    fn result_debug() {
        assert!(format!("{:?}", HeartbeatResult::TimedOut).contains("TimedOut"));
        assert_ne!(HeartbeatResult::TimedOut, HeartbeatResult::Cancelled);
    }
}
