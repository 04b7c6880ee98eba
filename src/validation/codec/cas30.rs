//! CAS 3.0: `/p3/serviceValidate` and `/p3/proxyValidate`.
//!
//! Same envelope as CAS 2.0. Attributes may also arrive inline, either as
//! flattened `<cas:attribute name=".." value=".."/>` elements or as
//! SAML-namespaced `<saml:Attribute>` elements. Inline attributes win; the
//! `cas:attributes` block is only consulted when there are none.

use chrono::{DateTime, Utc};

use crate::validation::assertion::Attributes;
use crate::validation::codec::cas20::{attributes_block, parse_service_response, service_validate_request};
use crate::validation::codec::xml::XmlElement;
use crate::validation::codec::{ProtocolCodec, RequestOptions};
use crate::validation::error::ValidationError;
use crate::validation::types::{ParsedResponse, Protocol, ValidationRequest};

const SAML_NAMESPACE_PREFIX: &str = "urn:oasis:names:tc:SAML:";

#[derive(Debug, Clone)]
pub struct Cas30Codec {
    options: RequestOptions,
    proxy_mode: bool,
}

impl Cas30Codec {
    pub fn new(options: RequestOptions, proxy_mode: bool) -> Self {
        Self {
            options,
            proxy_mode,
        }
    }

    fn suffix(&self) -> &'static str {
        if self.proxy_mode {
            "p3/proxyValidate"
        } else {
            "p3/serviceValidate"
        }
    }
}

impl ProtocolCodec for Cas30Codec {
    fn protocol(&self) -> Protocol {
        Protocol::Cas30
    }

    fn build_request(&self, ticket: &str, service: &str, _now: DateTime<Utc>) -> ValidationRequest {
        service_validate_request(&self.options, self.suffix(), ticket, service)
    }

    fn parse_response(&self, body: &str, now: DateTime<Utc>) -> Result<ParsedResponse, ValidationError> {
        parse_service_response(body, now, inline_or_block_attributes)
    }
}

fn inline_or_block_attributes(success: &XmlElement) -> Attributes {
    let mut attributes = Attributes::new();
    let mut found_inline = false;

    for flattened in success.descendants_named("attribute") {
        if let Some(name) = flattened.attribute("name") {
            found_inline = true;
            attributes.push(name, flattened.attribute("value").unwrap_or_default());
        }
    }

    for saml in success
        .descendants_named("Attribute")
        .into_iter()
        .filter(|e| e.in_namespace(SAML_NAMESPACE_PREFIX))
    {
        let name = saml.attribute("AttributeName").or_else(|| saml.attribute("Name"));
        if let Some(name) = name {
            found_inline = true;
            for value in saml.children_named("AttributeValue") {
                attributes.push(name, value.text());
            }
        }
    }

    if found_inline {
        attributes
    } else {
        attributes_block(success)
    }
}
