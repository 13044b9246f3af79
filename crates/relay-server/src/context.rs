//! Shared state handed to every connection handler.

use std::sync::Arc;

use relay_settings::PolicyConfig;

use crate::websocket::admission::AdmissionGate;
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::membership::MembershipTable;

/// Policy, membership table, and the engines built over them.
#[derive(Clone)]
pub struct RelayContext {
    /// Immutable policy snapshot.
    pub policy: Arc<PolicyConfig>,
    /// Shared membership table.
    pub membership: Arc<MembershipTable>,
    /// Fan-out engine over `membership`.
    pub broadcast: Arc<BroadcastEngine>,
    /// Admission gate over `policy` and `membership`.
    pub gate: AdmissionGate,
}

impl RelayContext {
    /// Build a context with an empty membership table.
    pub fn new(policy: PolicyConfig) -> Self {
        let policy = Arc::new(policy);
        let membership = Arc::new(MembershipTable::new());
        Self {
            broadcast: Arc::new(BroadcastEngine::new(Arc::clone(&membership))),
            gate: AdmissionGate::new(Arc::clone(&policy), Arc::clone(&membership)),
            policy,
            membership,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engines_share_one_table() {
        let ctx = RelayContext::new(PolicyConfig::new("t"));
        let (p, _rx) = crate::websocket::peer::test_support::peer(1);
        assert_eq!(
            ctx.gate.admit(&p, None),
            crate::websocket::admission::Admission::Accept
        );
        assert_eq!(ctx.membership.registered_peers(), 1);
    }
}
