//! CAS 2.0: XML responses from `/serviceValidate` and `/proxyValidate`.
//!
//! ```text
//! <cas:serviceResponse>
//!   <cas:authenticationSuccess>
//!     <cas:user>alice</cas:user>
//!     <cas:attributes><cas:memberOf>staff</cas:memberOf></cas:attributes>
//!     <cas:proxyGrantingTicket>PGTIOU-1</cas:proxyGrantingTicket>
//!     <cas:proxies><cas:proxy>https://proxy.example.com/</cas:proxy></cas:proxies>
//!   </cas:authenticationSuccess>
//! </cas:serviceResponse>
//! ```

use chrono::{DateTime, Utc};

use crate::validation::assertion::{Assertion, Attributes, Principal};
use crate::validation::codec::xml::XmlElement;
use crate::validation::codec::{ProtocolCodec, RequestOptions};
use crate::validation::error::ValidationError;
use crate::validation::types::{ParsedResponse, Protocol, ValidationRequest};

#[derive(Debug, Clone)]
pub struct Cas20Codec {
    options: RequestOptions,
    proxy_mode: bool,
}

impl Cas20Codec {
    /// `proxy_mode` selects `/proxyValidate`, which accepts proxy tickets.
    pub fn new(options: RequestOptions, proxy_mode: bool) -> Self {
        Self {
            options,
            proxy_mode,
        }
    }

    fn suffix(&self) -> &'static str {
        if self.proxy_mode {
            "proxyValidate"
        } else {
            "serviceValidate"
        }
    }
}

impl ProtocolCodec for Cas20Codec {
    fn protocol(&self) -> Protocol {
        Protocol::Cas20
    }

    fn build_request(&self, ticket: &str, service: &str, _now: DateTime<Utc>) -> ValidationRequest {
        service_validate_request(&self.options, self.suffix(), ticket, service)
    }

    fn parse_response(&self, body: &str, now: DateTime<Utc>) -> Result<ParsedResponse, ValidationError> {
        parse_service_response(body, now, attributes_block)
    }
}

/// GET request shared by the CAS 2.0 and 3.0 endpoints.
pub(crate) fn service_validate_request(
    options: &RequestOptions,
    suffix: &str,
    ticket: &str,
    service: &str,
) -> ValidationRequest {
    let callback: Vec<(&str, &str)> = options
        .proxy_callback_url
        .as_deref()
        .map(|url| ("pgtUrl", url))
        .into_iter()
        .collect();
    ValidationRequest::get(options.endpoint_url(
        suffix,
        &[("ticket", ticket), ("service", service)],
        &callback,
    ))
}

/// Parse a `cas:serviceResponse`, delegating attribute extraction.
pub(crate) fn parse_service_response<F>(
    body: &str,
    now: DateTime<Utc>,
    extract_attributes: F,
) -> Result<ParsedResponse, ValidationError>
where
    F: Fn(&XmlElement) -> Attributes,
{
    let root = XmlElement::parse(body)?;
    if root.name != "serviceResponse" {
        return Err(ValidationError::protocol(format!(
            "expected serviceResponse, found {}",
            root.name
        )));
    }

    if let Some(failure) = root.descendant("authenticationFailure") {
        return Err(ValidationError::ServerRejected {
            code: failure.attribute("code").map(str::to_string),
            detail: failure.text().to_string(),
        });
    }

    let success = root
        .descendant("authenticationSuccess")
        .ok_or_else(|| ValidationError::protocol("neither authenticationSuccess nor authenticationFailure present"))?;

    let user = success
        .descendant("user")
        .map(XmlElement::text)
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::NoPrincipal)?;

    let proxy_granting_ticket_iou = success
        .descendant("proxyGrantingTicket")
        .map(XmlElement::text)
        .filter(|iou| !iou.is_empty())
        .map(str::to_string);

    let proxies = success
        .descendant("proxies")
        .map(|proxies| {
            proxies
                .children_named("proxy")
                .map(XmlElement::text)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let principal = Principal::with_attributes(user, extract_attributes(success))?;

    Ok(ParsedResponse {
        assertion: Assertion::new(principal, now),
        proxy_granting_ticket_iou,
        proxies,
    })
}

/// Children of `cas:attributes`, each element name being the attribute name.
pub(crate) fn attributes_block(success: &XmlElement) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(block) = success.child("attributes") {
        for attribute in &block.children {
            attributes.push(attribute.name.as_str(), attribute.text());
        }
    }
    attributes
}
