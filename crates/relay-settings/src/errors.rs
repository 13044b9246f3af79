//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings or building a policy.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse the dotenv file.
    #[error("failed to parse dotenv file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    /// A settings value was invalid (e.g., an unparsable IP address).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// No shared auth token was configured.
    #[error("no auth token configured (set WS_AUTH_TOKEN or policy.authToken)")]
    MissingAuthToken,
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = SettingsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn json_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Json(_)));
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn missing_token_mentions_env_var() {
        let err = SettingsError::MissingAuthToken;
        assert!(err.to_string().contains("WS_AUTH_TOKEN"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("allowedIps: not-an-ip".into());
        assert_eq!(err.to_string(), "invalid settings value: allowedIps: not-an-ip");
    }
}
