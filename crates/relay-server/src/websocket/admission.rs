//! Connection admission: origin allow-list, source address allow-list, and
//! per-address connection cap.
//!
//! Admission runs before the message loop. An accepted peer is registered in
//! the [`MembershipTable`] (its address count incremented); a rejected one
//! never touches room state and is closed with a policy-violation code.

use std::sync::Arc;

use axum::extract::ws::close_code;
use axum::http::Uri;
use relay_settings::PolicyConfig;
use thiserror::Error;
use tracing::warn;

use super::membership::{CapReached, MembershipTable};
use super::peer::PeerHandle;

/// Why a connection attempt was refused.
///
/// The `Display` text is the close reason sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// An origin allow-list exists and the request carried no `Origin`.
    #[error("Origin required")]
    OriginRequired,
    /// The request's origin is not in the allow-list.
    #[error("Origin not allowed")]
    OriginNotAllowed,
    /// The source address is not in the IP allow-list.
    #[error("IP not allowed")]
    AddressNotAllowed,
    /// The source address is at its connection cap.
    #[error("Too many connections")]
    TooManyConnections,
}

impl Rejection {
    /// WebSocket close code (policy violation, 1008).
    pub fn close_code(self) -> u16 {
        close_code::POLICY
    }

    /// Short label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::OriginRequired => "origin_required",
            Self::OriginNotAllowed => "origin_not_allowed",
            Self::AddressNotAllowed => "ip_not_allowed",
            Self::TooManyConnections => "too_many_connections",
        }
    }
}

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed to the message loop. The peer is now registered.
    Accept,
    /// Close with the given reason; do not run the message loop.
    Reject(Rejection),
}

/// Evaluates new connections against the policy.
#[derive(Clone)]
pub struct AdmissionGate {
    policy: Arc<PolicyConfig>,
    membership: Arc<MembershipTable>,
}

impl AdmissionGate {
    /// Gate over the given policy and table.
    pub fn new(policy: Arc<PolicyConfig>, membership: Arc<MembershipTable>) -> Self {
        Self { policy, membership }
    }

    /// Decide whether `peer` may proceed.
    ///
    /// Checks run in order: origin, source address, per-address cap. On
    /// accept the peer's address count is incremented as part of the same
    /// atomic cap check.
    pub fn admit(&self, peer: &PeerHandle, origin: Option<&str>) -> Admission {
        if let Err(rejection) = self.check_origin(origin) {
            warn!(
                peer_id = %peer.id,
                address = %peer.address,
                origin,
                reason = %rejection,
                "connection rejected"
            );
            return Admission::Reject(rejection);
        }

        if !self.policy.is_ip_allowed(peer.address) {
            warn!(
                peer_id = %peer.id,
                address = %peer.address,
                "connection rejected from address not in allow-list"
            );
            return Admission::Reject(Rejection::AddressNotAllowed);
        }

        match self
            .membership
            .register(peer, self.policy.max_connections_per_ip())
        {
            Ok(()) => Admission::Accept,
            Err(CapReached) => {
                warn!(
                    peer_id = %peer.id,
                    address = %peer.address,
                    "too many connections from address"
                );
                Admission::Reject(Rejection::TooManyConnections)
            }
        }
    }

    fn check_origin(&self, origin: Option<&str>) -> Result<(), Rejection> {
        if self.policy.allowed_origins().is_none() {
            return Ok(());
        }
        let origin = origin.ok_or(Rejection::OriginRequired)?;
        match origin_key(origin) {
            Some(key) if self.policy.is_origin_allowed(&key) => Ok(()),
            _ => Err(Rejection::OriginNotAllowed),
        }
    }
}

/// Reduce an `Origin` header value to `scheme://host[:port]`.
///
/// Returns `None` when the value has no scheme or authority.
pub fn origin_key(origin: &str) -> Option<String> {
    let uri: Uri = origin.trim().parse().ok()?;
    let scheme = uri.scheme_str()?;
    let authority = uri.authority()?;
    Some(format!("{scheme}://{authority}").to_ascii_lowercase())
}
