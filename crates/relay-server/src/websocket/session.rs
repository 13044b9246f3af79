//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! 1. Admission; a rejected connection gets a 1008 close frame and nothing else
//! 2. A writer task drains the peer's outbound queue into the socket
//! 3. Inbound text (or UTF-8 binary) frames go through the [`MessageRouter`]
//! 4. The heartbeat, eviction, and server shutdown can each end the loop
//! 5. The router is closed on every exit path, releasing membership

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::admission::{Admission, Rejection};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::peer::PeerHandle;
use super::router::{MessageRouter, RouteOutcome};
use crate::config::ServerConfig;
use crate::context::RelayContext;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL,
    HEARTBEAT_TIMEOUTS_TOTAL,
};

/// How long to wait for the final close frame to be written.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent a close frame.
    ClientClosed,
    /// The stream ended or errored.
    TransportClosed,
    /// No activity after a keep-alive ping.
    HeartbeatTimeout,
    /// The peer was evicted by a failed delivery.
    Evicted,
    /// The server is shutting down.
    Shutdown,
}

impl SessionEnd {
    /// Close frame to send on the way out, if any.
    fn close_frame(self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::ClientClosed | Self::TransportClosed => return None,
            Self::HeartbeatTimeout => (close_code::ERROR, "keepalive ping timeout"),
            Self::Evicted => (close_code::ERROR, "Delivery failed"),
            Self::Shutdown => (close_code::AWAY, "Server shutting down"),
        };
        Some(CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        })
    }
}

/// Close an upgraded socket with the rejection's policy code and reason.
pub async fn reject(mut socket: WebSocket, rejection: Rejection) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => rejection.label()).increment(1);
    let frame = CloseFrame {
        code: rejection.close_code(),
        reason: Utf8Bytes::from(rejection.to_string()),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send rejection close frame");
    }
}

/// Run a session for an upgraded socket.
#[instrument(skip_all, fields(address = %address))]
pub async fn run_ws_session(
    socket: WebSocket,
    address: IpAddr,
    origin: Option<String>,
    ctx: RelayContext,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (send_tx, send_rx) = mpsc::channel::<Message>(config.send_queue_capacity);
    let peer = Arc::new(PeerHandle::new(address, send_tx));

    if let Admission::Reject(rejection) = ctx.gate.admit(&peer, origin.as_deref()) {
        reject(socket, rejection).await;
        return;
    }

    info!(peer_id = %peer.id, "client connected");
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(ws_tx, send_rx));

    let mut router = MessageRouter::new(Arc::clone(&peer), ctx);
    let heartbeat_cancel = shutdown.child_token();
    // holds a peer handle, so the queue stays open until this is dropped
    let mut heartbeat = Box::pin(run_heartbeat(
        Arc::clone(&peer),
        config.ping_interval,
        config.ping_timeout,
        heartbeat_cancel.clone(),
    ));

    let end = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(s) => Utf8Bytes::from(s.to_owned()),
                        Err(_) => {
                            debug!(
                                peer_id = %peer.id,
                                len = data.len(),
                                "ignoring non-UTF8 binary frame"
                            );
                            peer.mark_alive();
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        peer.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => break SessionEnd::ClientClosed,
                    Some(Err(e)) => {
                        info!(peer_id = %peer.id, error = %e, "transport error");
                        break SessionEnd::TransportClosed;
                    }
                    None => break SessionEnd::TransportClosed,
                };
                peer.mark_alive();
                if router.handle_frame(&text) == RouteOutcome::NotRegistered {
                    break SessionEnd::Evicted;
                }
            }
            result = &mut heartbeat => match result {
                HeartbeatResult::TimedOut => {
                    counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    let idle = peer.last_seen_elapsed().as_millis();
                    warn!(
                        peer_id = %peer.id,
                        idle_ms = u64::try_from(idle).unwrap_or(u64::MAX),
                        "client unresponsive, disconnecting"
                    );
                    break SessionEnd::HeartbeatTimeout;
                }
                HeartbeatResult::Disconnected => break SessionEnd::TransportClosed,
                HeartbeatResult::Cancelled => break SessionEnd::Shutdown,
            },
            () = peer.evicted() => break SessionEnd::Evicted,
            () = shutdown.cancelled() => break SessionEnd::Shutdown,
        }
    };

    heartbeat_cancel.cancel();
    drop(heartbeat);
    let _ = router.close();
    drop(router);

    if let Some(frame) = end.close_frame() {
        let _ = peer.send_within(Message::Close(Some(frame)), CLOSE_GRACE).await;
    }
    let age = peer.age();
    drop(peer);
    finish_writer(writer).await;

    info!(reason = ?end, duration_secs = age.as_secs_f64(), "client disconnected");
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}

/// Drain queued frames into the socket until the queue closes, a close
/// frame is written, or the socket fails.
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if ws_tx.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

async fn finish_writer(mut writer: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_exits_send_no_close_frame() {
        assert!(SessionEnd::ClientClosed.close_frame().is_none());
        assert!(SessionEnd::TransportClosed.close_frame().is_none());
    }

    #[test]
    fn shutdown_closes_going_away() {
        let frame = SessionEnd::Shutdown.close_frame().unwrap();
        assert_eq!(frame.code, close_code::AWAY);
    }

    #[test]
    fn heartbeat_timeout_closes_with_error_code() {
        let frame = SessionEnd::HeartbeatTimeout.close_frame().unwrap();
        assert_eq!(frame.code, close_code::ERROR);
        assert_eq!(frame.reason.as_str(), "keepalive ping timeout");
    }
}
