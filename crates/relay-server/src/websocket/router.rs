//! Per-connection protocol state machine.
//!
//! `Connected` (admitted, nothing authenticated yet) → `Active` (at least one
//! envelope carried the right token) → `Closed`. Each inbound frame goes
//! through: parse → token → form name → health check or join + broadcast.
//! Protocol errors are answered to the sender and never close the socket.
//!
//! Closing releases the peer's membership exactly once. The router also
//! closes itself on drop, so the unwind runs on every exit path of the
//! session, including panics.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use metrics::counter;
use relay_settings::HEALTH_CHECK_FORM;
use tracing::{debug, warn};

use super::broadcast::BroadcastReport;
use super::envelope::InboundEnvelope;
use super::membership::JoinOutcome;
use super::peer::PeerHandle;
use crate::context::RelayContext;
use crate::errors::ProtocolError;
use crate::health::health_report;
use crate::metrics::{FRAMES_TOTAL, HEALTH_CHECKS_TOTAL, PROTOCOL_ERRORS_TOTAL};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Admitted, no authenticated envelope yet.
    Connected,
    /// Has sent at least one authenticated envelope.
    Active,
    /// Terminal; membership released.
    Closed,
}

/// What handling one frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Answered with an error reply; no state changed.
    Rejected(ProtocolError),
    /// Answered with a health report.
    HealthReported,
    /// Joined `form` and fanned the frame out.
    Broadcast {
        /// Form the frame was sent to.
        form: String,
        /// Fan-out summary.
        report: BroadcastReport,
    },
    /// The peer's registration is gone (evicted); the session should end.
    NotRegistered,
    /// The router is already closed.
    Closed,
}

/// Routes frames for one connection.
pub struct MessageRouter {
    peer: Arc<PeerHandle>,
    ctx: RelayContext,
    state: ConnectionState,
    /// Last joined form; what `close` releases.
    current_form: Option<String>,
}

impl MessageRouter {
    /// Router for an admitted peer.
    pub fn new(peer: Arc<PeerHandle>, ctx: RelayContext) -> Self {
        Self {
            peer,
            ctx,
            state: ConnectionState::Connected,
            current_form: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last joined form, if any.
    pub fn current_form(&self) -> Option<&str> {
        self.current_form.as_deref()
    }

    /// Handle one inbound text frame.
    pub fn handle_frame(&mut self, raw: &Utf8Bytes) -> RouteOutcome {
        if self.state == ConnectionState::Closed {
            return RouteOutcome::Closed;
        }
        counter!(FRAMES_TOTAL).increment(1);
        debug!(
            peer_id = %self.peer.id,
            address = %self.peer.address,
            len = raw.as_str().len(),
            "frame received"
        );

        let envelope = match InboundEnvelope::parse(raw.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject(e),
        };

        if !envelope
            .token()
            .is_some_and(|t| self.ctx.policy.token_matches(t))
        {
            warn!(peer_id = %self.peer.id, address = %self.peer.address, "invalid token");
            return self.reject(ProtocolError::InvalidToken);
        }
        self.state = ConnectionState::Active;

        let Some(form) = envelope
            .form_name()
            .filter(|f| self.ctx.policy.is_form_allowed(f))
        else {
            return self.reject(ProtocolError::InvalidFormName);
        };

        if form == HEALTH_CHECK_FORM {
            self.reply_health();
            return RouteOutcome::HealthReported;
        }

        match self.ctx.membership.join(form, &self.peer) {
            JoinOutcome::NotRegistered => {
                debug!(
                    peer_id = %self.peer.id,
                    form_name = form,
                    "join refused, peer no longer registered"
                );
                return RouteOutcome::NotRegistered;
            }
            JoinOutcome::Moved { from } => {
                debug!(peer_id = %self.peer.id, from = %from, to = form, "peer moved forms");
            }
            JoinOutcome::Joined => {
                debug!(peer_id = %self.peer.id, form_name = form, "peer joined form");
            }
            JoinOutcome::AlreadyMember => {}
        }
        self.current_form = Some(form.to_string());

        let report = self.ctx.broadcast.broadcast(form, raw, &self.peer);
        RouteOutcome::Broadcast {
            form: form.to_string(),
            report,
        }
    }

    /// Transition to `Closed` and release membership.
    ///
    /// Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        let released = self
            .ctx
            .membership
            .leave(&self.peer, self.current_form.as_deref());
        debug!(
            peer_id = %self.peer.id,
            form_name = ?self.current_form,
            released,
            "membership released"
        );
        true
    }

    fn reject(&self, error: ProtocolError) -> RouteOutcome {
        counter!(PROTOCOL_ERRORS_TOTAL, "error" => error.label()).increment(1);
        let _ = self.peer.send_text(error.reply());
        RouteOutcome::Rejected(error)
    }

    fn reply_health(&self) {
        counter!(HEALTH_CHECKS_TOTAL).increment(1);
        match serde_json::to_string(&health_report(&self.ctx.membership)) {
            Ok(json) => {
                let _ = self.peer.send_text(json);
            }
            Err(e) => warn!(error = %e, "failed to serialize health report"),
        }
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::admission::Admission;
    use crate::websocket::peer::test_support::{next_text, peer};
    use assert_matches::assert_matches;
    use relay_settings::PolicyConfig;
    use serde_json::{Value, json};

    const TOKEN: &str = "token_secreto";

    fn ctx() -> RelayContext {
        let forms = ["chat_room", "orders", "health_check"];
        RelayContext::new(PolicyConfig::new(TOKEN).with_allowed_form_names(forms))
    }

    type Outbound = tokio::sync::mpsc::Receiver<axum::extract::ws::Message>;

    fn admitted(ctx: &RelayContext, octet: u8) -> (MessageRouter, Outbound, Arc<PeerHandle>) {
        let (p, rx) = peer(octet);
        assert_eq!(ctx.gate.admit(&p, None), Admission::Accept);
        (MessageRouter::new(Arc::clone(&p), ctx.clone()), rx, p)
    }

    fn frame(value: &Value) -> Utf8Bytes {
        Utf8Bytes::from(value.to_string())
    }

    fn text(s: &str) -> Utf8Bytes {
        Utf8Bytes::from(s.to_string())
    }

    fn reply(rx: &mut Outbound) -> Value {
        serde_json::from_str(&next_text(rx).expect("expected a reply")).unwrap()
    }

    #[test]
    fn invalid_json_reply_keeps_state() {
        let ctx = ctx();
        let (mut router, mut rx, _) = admitted(&ctx, 1);
        let outcome = router.handle_frame(&text("{oops"));
        assert_eq!(outcome, RouteOutcome::Rejected(ProtocolError::InvalidJson));
        assert_eq!(reply(&mut rx), json!({"error": "Invalid JSON"}));
        assert_eq!(router.state(), ConnectionState::Connected);
    }

    #[test]
    fn missing_fields_reply() {
        let ctx = ctx();
        let (mut router, mut rx, _) = admitted(&ctx, 1);
        let outcome = router.handle_frame(&frame(&json!({"token": TOKEN})));
        assert_eq!(outcome, RouteOutcome::Rejected(ProtocolError::InvalidFormat));
        assert_eq!(reply(&mut rx), json!({"error": "Invalid message format"}));
    }

    #[test]
    fn bad_token_never_joins_or_broadcasts() {
        let ctx = ctx();
        let (mut listener, mut listener_rx, _) = admitted(&ctx, 1);
        let _ = listener.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));

        let (mut router, mut rx, p) = admitted(&ctx, 2);
        let outcome =
            router.handle_frame(&frame(&json!({"token": "wrong", "form_name": "chat_room"})));
        assert_eq!(outcome, RouteOutcome::Rejected(ProtocolError::InvalidToken));
        assert_eq!(reply(&mut rx), json!({"error": "Invalid token"}));
        assert!(!ctx.membership.is_member("chat_room", p.id));
        assert_eq!(ctx.membership.members("chat_room").len(), 1);
        assert_eq!(next_text(&mut listener_rx), None);
        assert_eq!(router.state(), ConnectionState::Connected);
    }

    #[test]
    fn non_string_token_is_invalid_token() {
        let ctx = ctx();
        let (mut router, _rx, _) = admitted(&ctx, 1);
        let outcome = router.handle_frame(&frame(&json!({"token": 42, "form_name": "chat_room"})));
        assert_eq!(outcome, RouteOutcome::Rejected(ProtocolError::InvalidToken));
    }

    #[test]
    fn retry_after_bad_token_succeeds() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        let _ = router.handle_frame(&frame(&json!({"token": "nope", "form_name": "chat_room"})));
        let outcome =
            router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        assert_matches!(outcome, RouteOutcome::Broadcast { ref form, .. } if form == "chat_room");
        assert!(ctx.membership.is_member("chat_room", p.id));
        assert_eq!(router.state(), ConnectionState::Active);
    }

    #[test]
    fn disallowed_form_is_never_created() {
        let ctx = ctx();
        let (mut router, mut rx, _) = admitted(&ctx, 1);
        let outcome =
            router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "secret_room"})));
        assert_eq!(outcome, RouteOutcome::Rejected(ProtocolError::InvalidFormName));
        assert_eq!(reply(&mut rx), json!({"error": "Invalid form_name"}));
        assert!(ctx.membership.count_by_form().is_empty());
        // the token was right, so the connection counts as authenticated
        assert_eq!(router.state(), ConnectionState::Active);
        assert!(router.current_form().is_none());
    }

    #[test]
    fn health_check_does_not_join() {
        let ctx = ctx();
        let (mut a, _ra, _) = admitted(&ctx, 1);
        let (mut b, _rb, _) = admitted(&ctx, 2);
        let _ = a.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        let _ = b.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "orders"})));

        let (mut checker, mut rx, p) = admitted(&ctx, 3);
        let outcome =
            checker.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "health_check"})));
        assert_eq!(outcome, RouteOutcome::HealthReported);
        let status = reply(&mut rx);
        assert_eq!(status["status"], "ok");
        assert_eq!(status["total_connections"], 2);
        assert_eq!(status["form_connections"]["chat_room"], 1);
        assert_eq!(status["form_connections"]["orders"], 1);
        assert!(status["timestamp"].is_string());
        assert!(ctx.membership.form_of(p.id).is_none());
        assert_eq!(checker.state(), ConnectionState::Active);
        assert!(checker.current_form().is_none());
    }

    #[test]
    fn scenario_a_exact_payload_no_echo() {
        let ctx = ctx();
        let (mut p1, mut rx1, _) = admitted(&ctx, 1);
        let (mut p2, mut rx2, _) = admitted(&ctx, 2);
        let _ = p2.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));

        let raw = format!(r#"{{"token":"{TOKEN}","form_name":"chat_room","text":"hi"}}"#);
        let outcome = p1.handle_frame(&text(&raw));
        assert_matches!(outcome, RouteOutcome::Broadcast { report, .. } if report.delivered == 1);
        assert_eq!(next_text(&mut rx2).as_deref(), Some(raw.as_str()));
        assert_eq!(next_text(&mut rx1), None);
    }

    #[test]
    fn extra_fields_forwarded_verbatim() {
        let ctx = ctx();
        let (mut p1, _rx1, _) = admitted(&ctx, 1);
        let (mut p2, mut rx2, _) = admitted(&ctx, 2);
        let _ = p2.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        // key order and whitespace preserved
        let raw = format!(
            "{{ \"z\": 1,\"token\":\"{TOKEN}\", \"form_name\":\"chat_room\",{} }}",
            "\"nested\":{\"a\":[1,2]}"
        );
        let _ = p1.handle_frame(&text(&raw));
        assert_eq!(next_text(&mut rx2).as_deref(), Some(raw.as_str()));
    }

    #[test]
    fn close_releases_membership_once() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        let _ = router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        assert_eq!(router.current_form(), Some("chat_room"));
        assert!(router.close());
        assert!(!router.close());
        assert_eq!(router.state(), ConnectionState::Closed);
        assert!(!ctx.membership.is_member("chat_room", p.id));
        assert_eq!(ctx.membership.connections_from(p.address), 0);
        assert_eq!(router.handle_frame(&text("{}")), RouteOutcome::Closed);
    }

    #[test]
    fn close_without_join_releases_address() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        assert_eq!(ctx.membership.connections_from(p.address), 1);
        assert!(router.close());
        assert_eq!(ctx.membership.connections_from(p.address), 0);
    }

    #[test]
    fn drop_unwinds() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        let _ = router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        drop(router);
        assert!(ctx.membership.count_by_form().is_empty());
        assert_eq!(ctx.membership.connections_from(p.address), 0);
    }

    #[test]
    fn switching_forms_tracks_last_joined() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        let _ = router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        let _ = router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "orders"})));
        assert_eq!(router.current_form(), Some("orders"));
        assert!(!ctx.membership.is_member("chat_room", p.id));
        assert!(router.close());
        assert!(ctx.membership.count_by_form().is_empty());
    }

    #[test]
    fn evicted_peer_is_not_rejoined() {
        let ctx = ctx();
        let (mut router, _rx, p) = admitted(&ctx, 1);
        let _ = ctx.membership.leave(&p, None);
        let outcome =
            router.handle_frame(&frame(&json!({"token": TOKEN, "form_name": "chat_room"})));
        assert_eq!(outcome, RouteOutcome::NotRegistered);
        assert!(ctx.membership.members("chat_room").is_empty());
    }
}
