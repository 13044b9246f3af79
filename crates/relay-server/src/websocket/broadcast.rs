//! Fan-out of one raw frame to every other member of a form.
//!
//! Delivery never waits: each recipient's frame goes into its bounded
//! outbound queue. A closed queue means the peer is gone and it is evicted.
//! A full queue drops the frame; a peer that keeps its queue full is evicted
//! once it has dropped [`MAX_TOTAL_DROPS`] frames. Evictions go through the
//! same idempotent [`MembershipTable::leave`] the peer's own session uses.

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use metrics::counter;
use tracing::{debug, info};

use super::membership::MembershipTable;
use super::peer::{Delivery, PeerHandle, PeerId};
use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, BROADCAST_DROPS_TOTAL, BROADCAST_EVICTIONS_TOTAL};

/// Maximum total lifetime frame drops before a slow peer is evicted.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Per-recipient result of a fan-out pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Frame queued.
    Delivered,
    /// Frame dropped on a full queue; peer kept.
    Dropped,
    /// Peer removed from membership.
    Evicted,
}

/// Summary of one broadcast call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients that dropped the frame but were kept.
    pub dropped: usize,
    /// Recipients evicted during this pass.
    pub evicted: Vec<PeerId>,
}

impl BroadcastReport {
    fn record(&mut self, peer: PeerId, outcome: RecipientOutcome) {
        match outcome {
            RecipientOutcome::Delivered => self.delivered += 1,
            RecipientOutcome::Dropped => self.dropped += 1,
            RecipientOutcome::Evicted => self.evicted.push(peer),
        }
    }
}

/// Delivers frames to form members.
pub struct BroadcastEngine {
    membership: Arc<MembershipTable>,
    max_drops: u64,
}

impl BroadcastEngine {
    /// Engine over `membership` with the default slow-peer limit.
    pub fn new(membership: Arc<MembershipTable>) -> Self {
        Self {
            membership,
            max_drops: MAX_TOTAL_DROPS,
        }
    }

    /// Override the slow-peer drop limit.
    #[must_use]
    pub fn with_max_drops(mut self, max_drops: u64) -> Self {
        self.max_drops = max_drops.max(1);
        self
    }

    /// Send `raw` unmodified to every member of `form` except `sender`.
    pub fn broadcast(&self, form: &str, raw: &Utf8Bytes, sender: &PeerHandle) -> BroadcastReport {
        let members = self.membership.members(form);
        let mut report = BroadcastReport::default();
        let mut to_evict: Vec<Arc<PeerHandle>> = Vec::new();

        for member in members.iter().filter(|m| m.id != sender.id) {
            let outcome = self.deliver(member, raw);
            if outcome == RecipientOutcome::Evicted {
                to_evict.push(Arc::clone(member));
            }
            report.record(member.id, outcome);
        }

        for peer in &to_evict {
            if self.membership.leave(peer, Some(form)) {
                info!(
                    peer_id = %peer.id,
                    address = %peer.address,
                    form_name = form,
                    "evicted peer after failed delivery"
                );
            }
            peer.evict();
        }

        counter!(BROADCAST_DELIVERIES_TOTAL).increment(report.delivered as u64);
        counter!(BROADCAST_DROPS_TOTAL).increment(report.dropped as u64);
        counter!(BROADCAST_EVICTIONS_TOTAL).increment(report.evicted.len() as u64);
        debug!(
            form_name = form,
            sender = %sender.id,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted.len(),
            "broadcast"
        );
        report
    }

    fn deliver(&self, member: &PeerHandle, raw: &Utf8Bytes) -> RecipientOutcome {
        match member.send(Message::Text(raw.clone())) {
            Delivery::Delivered => RecipientOutcome::Delivered,
            Delivery::Closed => {
                debug!(peer_id = %member.id, "delivery failed, queue closed");
                RecipientOutcome::Evicted
            }
            Delivery::Dropped if member.drop_count() >= self.max_drops => {
                debug!(
                    peer_id = %member.id,
                    drops = member.drop_count(),
                    "slow peer over drop limit"
                );
                RecipientOutcome::Evicted
            }
            Delivery::Dropped => RecipientOutcome::Dropped,
        }
    }
}
