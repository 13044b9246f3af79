//! Connected peer handle.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, Utf8Bytes};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Unique, time-ordered peer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of handing one frame to a peer's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the writer task.
    Delivered,
    /// Queue full; the frame was dropped.
    Dropped,
    /// The writer task is gone; the peer is dead.
    Closed,
}

/// One connected client.
///
/// The transport owns the socket; everything else talks to the peer through
/// its bounded outbound queue.
pub struct PeerHandle {
    /// Unique peer ID.
    pub id: PeerId,
    /// Source address the connection came from.
    pub address: IpAddr,
    tx: mpsc::Sender<Message>,
    /// When this connection was established.
    pub connected_at: Instant,
    alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    evicted: CancellationToken,
}

impl PeerHandle {
    /// Create a handle writing into `tx`.
    pub fn new(address: IpAddr, tx: mpsc::Sender<Message>) -> Self {
        let now = Instant::now();
        Self {
            id: PeerId::new(),
            address,
            tx,
            connected_at: now,
            alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            evicted: CancellationToken::new(),
        }
    }

    /// Queue a frame without waiting.
    pub fn send(&self, message: Message) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: impl Into<Utf8Bytes>) -> Delivery {
        self.send(Message::Text(text.into()))
    }

    /// Queue a frame, waiting up to `grace` for room in the queue.
    ///
    /// Used for control frames that must not be lost to a momentarily full
    /// queue (pings, the final close frame).
    pub async fn send_within(&self, message: Message, grace: Duration) -> Delivery {
        match tokio::time::timeout(grace, self.tx.send(message)).await {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(_)) => Delivery::Closed,
            Err(_) => Delivery::Dropped,
        }
    }

    /// Total frames dropped for this peer.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Take the alive flag, leaving it cleared.
    ///
    /// Returns `true` if the peer showed activity since the last call.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Signal the peer's session to terminate after eviction.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    /// Whether [`evict`](Self::evict) has been called.
    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// Resolves once the peer is evicted.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.evicted.cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = peer(1);
        let (b, _rb) = peer(1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.address, b.address);
    }

    #[tokio::test]
    async fn send_text_success() {
        let (p, mut rx) = peer(1);
        assert_eq!(p.send_text("hello"), Delivery::Delivered);
        assert_eq!(next_text(&mut rx).as_deref(), Some("hello"));
    }

    #[test]
    fn send_to_closed_queue() {
        let (p, rx) = peer(1);
        drop(rx);
        assert_eq!(p.send_text("hello"), Delivery::Closed);
        assert_eq!(p.drop_count(), 0);
    }

    #[test]
    fn send_to_full_queue_counts_drop() {
        let (p, _rx) = peer_with_capacity(1, 1);
        assert_eq!(p.send_text("one"), Delivery::Delivered);
        assert_eq!(p.send_text("two"), Delivery::Dropped);
        assert_eq!(p.drop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_within_times_out_on_full_queue() {
        let (p, _rx) = peer_with_capacity(1, 1);
        let _ = p.send_text("fill");
        let outcome = p
            .send_within(Message::Ping(Vec::new().into()), Duration::from_millis(50))
            .await;
        assert_eq!(outcome, Delivery::Dropped);
    }

    #[test]
    fn alive_flag_is_taken() {
        let (p, _rx) = peer(1);
        assert!(p.check_alive());
        assert!(!p.check_alive());
        p.mark_alive();
        assert!(p.check_alive());
    }

    #[test]
    fn activity_resets_idle_time() {
        let (p, _rx) = peer(1);
        std::thread::sleep(Duration::from_millis(20));
        p.mark_alive();
        assert!(p.last_seen_elapsed() < p.age());
    }

    #[tokio::test]
    async fn eviction_signal_resolves() {
        let (p, _rx) = peer(1);
        assert!(!p.is_evicted());
        p.evict();
        p.evicted().await;
        assert!(p.is_evicted());
    }
}
