//! Health report, served in-band for the `health_check` form and on `GET /health`.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::websocket::membership::MembershipTable;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// ISO-8601 time the report was taken.
    pub timestamp: String,
    /// Members across all forms.
    pub total_connections: usize,
    /// Members per form.
    pub form_connections: BTreeMap<String, usize>,
}

/// Build a health response from the live table.
///
/// `total_connections` is the sum of `form_connections` from one snapshot.
pub fn health_report(membership: &MembershipTable) -> HealthResponse {
    let form_connections = membership.count_by_form();
    HealthResponse {
        status: "ok".into(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        total_connections: form_connections.values().sum(),
        form_connections,
    }
}
