//! Inbound frame parsing.
//!
//! Only `token` and `form_name` are interpreted. Everything else in the
//! object is payload and is forwarded verbatim by the broadcast step, so the
//! parsed value is never re-serialized.

use serde_json::Value;

use crate::errors::ProtocolError;

/// Parsed request: the two routing fields of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    token: Value,
    form_name: Value,
}

impl InboundEnvelope {
    /// Parse a text frame.
    ///
    /// - not JSON → [`ProtocolError::InvalidJson`]
    /// - not an object, or missing `token` / `form_name` → [`ProtocolError::InvalidFormat`]
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| ProtocolError::InvalidJson)?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::InvalidFormat);
        };
        match (fields.remove("token"), fields.remove("form_name")) {
            (Some(token), Some(form_name)) => Ok(Self { token, form_name }),
            _ => Err(ProtocolError::InvalidFormat),
        }
    }

    /// The token, if it is a string.
    pub fn token(&self) -> Option<&str> {
        self.token.as_str()
    }

    /// The form name, if it is a string.
    pub fn form_name(&self) -> Option<&str> {
        self.form_name.as_str()
    }
}
