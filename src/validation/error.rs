//! Error types for CAS ticket validation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while validating a ticket.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Ticket rejected by CAS server{}: {detail}", .code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    ServerRejected {
        code: Option<String>,
        detail: String,
    },

    #[error("No principal was found in the response from the CAS server")]
    NoPrincipal,

    #[error("Proxy chain is not authorized: [{}]", .chain.join(", "))]
    InvalidProxyChain { chain: Vec<String> },

    #[error("No assertion valid at {now} within a tolerance of {tolerance_ms}ms; check for ticket replay or clock drift")]
    NoValidAssertionInTimeWindow {
        now: DateTime<Utc>,
        tolerance_ms: u128,
    },
}

impl ValidationError {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        ValidationError::ProtocolViolation(reason.into())
    }
}

/// Errors raised while reaching the CAS server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to reach CAS server at {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("CAS server answered with HTTP status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        TransportError::Connection {
            url,
            reason: e.to_string(),
        }
    }
}

/// Errors in the validator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
