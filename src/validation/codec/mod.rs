//! Protocol codecs.
//!
//! One codec per CAS protocol version. A codec is pure: it turns
//! `(ticket, service)` into an outbound [`ValidationRequest`] and a raw server
//! response into a [`ParsedResponse`] or a typed [`ValidationError`]. The
//! validator picks a codec once at construction and only sees this trait.

pub mod cas10;
pub mod cas20;
pub mod cas30;
pub mod saml11;
pub mod xml;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use url::form_urlencoded;

use crate::validation::clock::RandomIdGenerator;
use crate::validation::config::ValidatorConfig;
use crate::validation::error::ValidationError;
use crate::validation::types::{ParsedResponse, Protocol, ValidationRequest};

pub use cas10::Cas10Codec;
pub use cas20::Cas20Codec;
pub use cas30::Cas30Codec;
pub use saml11::Saml11Codec;

/// Request builder and response parser for one protocol version.
pub trait ProtocolCodec: Send + Sync {
    /// Protocol this codec speaks.
    fn protocol(&self) -> Protocol;

    /// Build the outbound validation request.
    fn build_request(&self, ticket: &str, service: &str, now: DateTime<Utc>) -> ValidationRequest;

    /// Parse the decoded server response.
    fn parse_response(&self, body: &str, now: DateTime<Utc>) -> Result<ParsedResponse, ValidationError>;
}

/// Request-building options shared by every codec.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Base URL of the CAS server, e.g. `https://cas.example.com/cas`.
    pub server_url_prefix: String,
    /// Adds `renew=true`, requiring the ticket to come from a fresh login.
    pub renew: bool,
    /// `pgtUrl` sent to CAS 2.0/3.0 servers.
    pub proxy_callback_url: Option<String>,
    /// Appended to every request after the protocol parameters.
    pub custom_parameters: BTreeMap<String, String>,
}

impl RequestOptions {
    /// Options with only the server prefix set.
    pub fn new(server_url_prefix: impl Into<String>) -> Self {
        Self {
            server_url_prefix: server_url_prefix.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self {
            server_url_prefix: config.server_url_prefix.clone(),
            renew: config.renew,
            proxy_callback_url: config.proxy_callback_url.clone(),
            custom_parameters: config.custom_parameters.clone(),
        }
    }

    /// `<prefix>/<suffix>?<leading>[&renew=true]<trailing><custom>` with every
    /// value form-encoded.
    pub(crate) fn endpoint_url(
        &self,
        suffix: &str,
        leading: &[(&str, &str)],
        trailing: &[(&str, &str)],
    ) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (name, value) in leading {
            query.append_pair(name, value);
        }
        if self.renew {
            query.append_pair("renew", "true");
        }
        for (name, value) in trailing {
            query.append_pair(name, value);
        }
        for (name, value) in &self.custom_parameters {
            query.append_pair(name, value);
        }
        format!("{}?{}", join_path(&self.server_url_prefix, suffix), query.finish())
    }
}

pub(crate) fn join_path(prefix: &str, suffix: &str) -> String {
    if prefix.ends_with('/') {
        format!("{}{}", prefix, suffix)
    } else {
        format!("{}/{}", prefix, suffix)
    }
}

/// Build the codec selected by `config.protocol`.
pub fn codec_for(config: &ValidatorConfig) -> Box<dyn ProtocolCodec> {
    let options = RequestOptions::from_config(config);
    let proxy_mode = config.proxy_chain_policy().is_proxy_mode();
    match config.protocol {
        Protocol::Cas10 => Box::new(Cas10Codec::new(options)),
        Protocol::Cas20 => Box::new(Cas20Codec::new(options, proxy_mode)),
        Protocol::Cas30 => Box::new(Cas30Codec::new(options, proxy_mode)),
        Protocol::Saml11 => Box::new(Saml11Codec::new(
            options,
            config.tolerance,
            Box::new(RandomIdGenerator),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_encodes_values() {
        let mut options = RequestOptions::new("https://cas.example.com/cas/");
        options.renew = true;
        options
            .custom_parameters
            .insert("locale".to_string(), "en US".to_string());

        let url = options.endpoint_url(
            "serviceValidate",
            &[("ticket", "ST-1"), ("service", "https://app.example.com/a?b=c&d")],
            &[("pgtUrl", "https://app.example.com/cb")],
        );
        assert_eq!(
            url,
            "https://cas.example.com/cas/serviceValidate?ticket=ST-1\
             &service=https%3A%2F%2Fapp.example.com%2Fa%3Fb%3Dc%26d&renew=true&pgtUrl=https%3A%2F%2Fapp.example.com%2Fcb&locale=en+US"
        );
    }

    #[test]
    fn test_codec_for_selects_protocol() {
        for protocol in [
            Protocol::Cas10,
            Protocol::Cas20,
            Protocol::Cas30,
            Protocol::Saml11,
        ] {
            let config = ValidatorConfig::new("https://cas.example.com/cas", protocol);
            assert_eq!(codec_for(&config).protocol(), protocol);
        }
    }
}
