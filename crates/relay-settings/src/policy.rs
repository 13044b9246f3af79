//! Immutable admission and routing policy.
//!
//! Built once from [`PolicySettings`] at startup and shared read-only by every
//! connection handler.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use subtle::ConstantTimeEq;

use crate::errors::{Result, SettingsError};
use crate::types::PolicySettings;

/// Form name answered with a status report instead of being joined.
pub const HEALTH_CHECK_FORM: &str = "health_check";

/// Validated policy snapshot.
#[derive(Clone)]
pub struct PolicyConfig {
    auth_token: String,
    allowed_origins: Option<HashSet<String>>,
    max_connections_per_ip: Option<usize>,
    allowed_ips: Option<HashSet<IpAddr>>,
    allowed_form_names: HashSet<String>,
}

impl PolicyConfig {
    /// Policy with the given token, no origin/IP restrictions, no cap, and
    /// the default form names.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            allowed_origins: None,
            max_connections_per_ip: None,
            allowed_ips: None,
            allowed_form_names: PolicySettings::default()
                .allowed_form_names
                .into_iter()
                .collect(),
        }
    }

    /// Validate raw settings into a policy.
    pub fn from_settings(settings: &PolicySettings) -> Result<Self> {
        let auth_token = settings
            .auth_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(SettingsError::MissingAuthToken)?;

        let allowed_ips = match &settings.allowed_ips {
            Some(ips) => {
                let parsed = ips
                    .iter()
                    .map(|ip| {
                        ip.trim().parse::<IpAddr>().map_err(|_| {
                            SettingsError::InvalidValue(format!(
                                "allowedIps: {ip:?} is not an IP address"
                            ))
                        })
                    })
                    .collect::<Result<HashSet<_>>>()?;
                (!parsed.is_empty()).then_some(parsed)
            }
            None => None,
        };

        let policy = Self::new(auth_token)
            .with_allowed_form_names(settings.allowed_form_names.iter().map(String::as_str))
            .with_max_connections_per_ip(settings.max_connections_per_ip);
        let policy = match &settings.allowed_origins {
            Some(origins) => policy.with_allowed_origins(origins.iter().map(String::as_str)),
            None => policy,
        };
        Ok(Self { allowed_ips, ..policy })
    }

    /// Replace the origin allow-list. An empty list removes the restriction.
    #[must_use]
    pub fn with_allowed_origins<'a>(mut self, origins: impl IntoIterator<Item = &'a str>) -> Self {
        let set: HashSet<String> = origins
            .into_iter()
            .map(normalize_origin)
            .filter(|o| !o.is_empty())
            .collect();
        self.allowed_origins = (!set.is_empty()).then_some(set);
        self
    }

    /// Set or clear the per-address connection cap.
    #[must_use]
    pub fn with_max_connections_per_ip(mut self, cap: Option<usize>) -> Self {
        self.max_connections_per_ip = cap;
        self
    }

    /// Replace the source address allow-list. An empty list removes the restriction.
    #[must_use]
    pub fn with_allowed_ips(mut self, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        let set: HashSet<IpAddr> = ips.into_iter().collect();
        self.allowed_ips = (!set.is_empty()).then_some(set);
        self
    }

    /// Replace the set of allowed form names.
    #[must_use]
    pub fn with_allowed_form_names<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.allowed_form_names = names
            .into_iter()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(ToString::to_string)
            .collect();
        self
    }

    /// Whether `candidate` equals the shared token.
    ///
    /// Runs in time independent of where the first mismatch occurs.
    pub fn token_matches(&self, candidate: &str) -> bool {
        self.auth_token.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    /// Normalized origin allow-list, if one is configured.
    pub fn allowed_origins(&self) -> Option<&HashSet<String>> {
        self.allowed_origins.as_ref()
    }

    /// Whether a normalized `scheme://host[:port]` origin is allowed.
    /// Always `true` without an allow-list.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .as_ref()
            .is_none_or(|set| set.contains(&normalize_origin(origin)))
    }

    /// Per-address connection cap, if configured.
    pub fn max_connections_per_ip(&self) -> Option<usize> {
        self.max_connections_per_ip
    }

    /// Source address allow-list, if configured.
    pub fn allowed_ips(&self) -> Option<&HashSet<IpAddr>> {
        self.allowed_ips.as_ref()
    }

    /// Whether a source address is allowed. Always `true` without an allow-list.
    pub fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_ips.as_ref().is_none_or(|set| set.contains(&ip))
    }

    /// Allowed form names.
    pub fn allowed_form_names(&self) -> &HashSet<String> {
        &self.allowed_form_names
    }

    /// Whether `name` may be used as a form.
    pub fn is_form_allowed(&self, name: &str) -> bool {
        self.allowed_form_names.contains(name)
    }
}

impl fmt::Debug for PolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyConfig")
            .field("auth_token", &"<redacted>")
            .field("allowed_origins", &self.allowed_origins)
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .field("allowed_ips", &self.allowed_ips)
            .field("allowed_form_names", &self.allowed_form_names)
            .finish()
    }
}

/// Lowercase, trim, and drop a trailing `/` so `https://App.example/` and
/// `https://app.example` compare equal.
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
