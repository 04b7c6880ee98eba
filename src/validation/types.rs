//! Shared types for CAS ticket validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validation::assertion::Assertion;
use crate::validation::error::ConfigError;

/// CAS protocol variant spoken with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "cas1")]
    Cas10,
    #[serde(rename = "cas2")]
    Cas20,
    #[serde(rename = "cas3")]
    Cas30,
    #[serde(rename = "saml11")]
    Saml11,
}

impl Protocol {
    /// Whether the protocol can hand out proxy-granting tickets.
    pub fn supports_proxying(self) -> bool {
        matches!(self, Protocol::Cas20 | Protocol::Cas30)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Cas10 => write!(f, "cas1"),
            Protocol::Cas20 => write!(f, "cas2"),
            Protocol::Cas30 => write!(f, "cas3"),
            Protocol::Saml11 => write!(f, "saml11"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cas1" | "cas10" | "cas1.0" => Ok(Protocol::Cas10),
            "cas2" | "cas20" | "cas2.0" => Ok(Protocol::Cas20),
            "cas3" | "cas30" | "cas3.0" => Ok(Protocol::Cas30),
            "saml" | "saml11" | "saml1.1" => Ok(Protocol::Saml11),
            other => Err(ConfigError::invalid(
                "protocol",
                format!("unknown protocol '{}'", other),
            )),
        }
    }
}

/// HTTP method of a [`ValidationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// Outbound request to the CAS server, built by a protocol codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub method: HttpMethod,
    /// Absolute endpoint URL, query string included.
    pub url: String,
    /// Request body; only SAML 1.1 POSTs carry one.
    pub body: Option<String>,
    /// Extra headers as `(name, value)` pairs, sent in order.
    pub headers: Vec<(String, String)>,
}

impl ValidationRequest {
    /// Body-less GET to `url`.
    pub fn get(url: String) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: None,
            headers: Vec::new(),
        }
    }

    /// POST of `body` to `url`.
    pub fn post(url: String, body: String) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Raw answer from the CAS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code as received.
    pub status: u16,
    /// Undecoded body bytes.
    pub body: Vec<u8>,
}

/// Outcome of a successful codec parse, before proxy-chain and PGT handling.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub assertion: Assertion,

    /// PGT-IOU to be correlated through the proxy-granting ticket store.
    pub proxy_granting_ticket_iou: Option<String>,

    /// Proxies the ticket went through, most recent first.
    pub proxies: Vec<String>,
}

impl ParsedResponse {
    pub fn new(assertion: Assertion) -> Self {
        Self {
            assertion,
            proxy_granting_ticket_iou: None,
            proxies: Vec::new(),
        }
    }
}
