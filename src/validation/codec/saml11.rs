//! SAML 1.1: SOAP POST to `/samlValidate`.
//!
//! The response may carry several assertions; the first whose
//! `Conditions` window contains the current time wins. `NotBefore` is widened
//! by the configured clock-skew tolerance, `NotOnOrAfter` is enforced as is.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use log::debug;
use quick_xml::escape::escape;

use crate::validation::assertion::{Assertion, Attributes, Principal};
use crate::validation::clock::IdGenerator;
use crate::validation::codec::xml::XmlElement;
use crate::validation::codec::{ProtocolCodec, RequestOptions};
use crate::validation::error::ValidationError;
use crate::validation::types::{ParsedResponse, Protocol, ValidationRequest};

pub const SAML_PROTOCOL_NAMESPACE: &str = "urn:oasis:names:tc:SAML:1.0:protocol";
pub const SAML_ASSERTION_NAMESPACE: &str = "urn:oasis:names:tc:SAML:1.0:assertion";

/// Assertion attribute carrying the `AuthenticationMethod` of the statement.
pub const AUTHENTICATION_METHOD_ATTRIBUTE: &str = "samlAuthenticationStatement::authMethod";

const SOAP_ACTION: &str = "http://www.oasis-open.org/committees/security";

pub struct Saml11Codec {
    options: RequestOptions,
    tolerance: Duration,
    ids: Box<dyn IdGenerator>,
}

impl fmt::Debug for Saml11Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saml11Codec")
            .field("options", &self.options)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl Saml11Codec {
    pub fn new(options: RequestOptions, tolerance: Duration, ids: Box<dyn IdGenerator>) -> Self {
        Self {
            options,
            tolerance,
            ids,
        }
    }

    fn request_envelope(&self, ticket: &str, now: DateTime<Utc>) -> String {
        format!(
            "<SOAP-ENV:Envelope xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope/\">\
             <SOAP-ENV:Header/><SOAP-ENV:Body>\
             <samlp:Request xmlns:samlp=\"{}\" MajorVersion=\"1\" MinorVersion=\"1\" \
             RequestID=\"{}\" IssueInstant=\"{}\">\
             <samlp:AssertionArtifact>{}</samlp:AssertionArtifact>\
             </samlp:Request></SOAP-ENV:Body></SOAP-ENV:Envelope>",
            SAML_PROTOCOL_NAMESPACE,
            escape(self.ids.new_id().as_str()),
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
            escape(ticket)
        )
    }

    /// `(NotBefore, NotOnOrAfter)` if `assertion` is usable at `now`.
    fn time_window(
        &self,
        assertion: &XmlElement,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let conditions = assertion.child("Conditions");
        let not_before = conditions.and_then(|c| parse_instant(c.attribute("NotBefore")?));
        let not_on_or_after = conditions.and_then(|c| parse_instant(c.attribute("NotOnOrAfter")?));

        let (not_before, not_on_or_after) = match (not_before, not_on_or_after) {
            (Some(nb), Some(noa)) => (nb, noa),
            _ => {
                debug!("Skipping SAML assertion without bounding dates");
                return None;
            }
        };

        let earliest = TimeDelta::from_std(self.tolerance)
            .ok()
            .and_then(|tolerance| not_before.checked_sub_signed(tolerance))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if now < earliest {
            debug!(
                "Skipping SAML assertion not valid before {} (now {}, tolerance {:?})",
                not_before, now, self.tolerance
            );
            return None;
        }
        if now >= not_on_or_after {
            debug!(
                "Skipping SAML assertion expired at {} (now {})",
                not_on_or_after, now
            );
            return None;
        }

        Some((not_before, not_on_or_after))
    }
}

impl ProtocolCodec for Saml11Codec {
    fn protocol(&self) -> Protocol {
        Protocol::Saml11
    }

    fn build_request(&self, ticket: &str, service: &str, now: DateTime<Utc>) -> ValidationRequest {
        let url = self
            .options
            .endpoint_url("samlValidate", &[("TARGET", service)], &[]);
        ValidationRequest::post(url, self.request_envelope(ticket, now))
            .with_header("Content-Type", "text/xml")
            .with_header("SOAPAction", SOAP_ACTION)
            .with_header("Cache-Control", "no-cache")
    }

    fn parse_response(&self, body: &str, now: DateTime<Utc>) -> Result<ParsedResponse, ValidationError> {
        let envelope = XmlElement::parse(body)?;
        if envelope.name != "Envelope" {
            return Err(ValidationError::protocol(format!(
                "expected SOAP Envelope, found {}",
                envelope.name
            )));
        }
        let response = envelope
            .child("Body")
            .and_then(|b| b.child("Response"))
            .ok_or_else(|| ValidationError::protocol("SOAP body carries no SAML Response"))?;
        if matches!(&response.namespace, Some(ns) if ns != SAML_PROTOCOL_NAMESPACE) {
            return Err(ValidationError::protocol(format!(
                "SAML Response in unexpected namespace {:?}",
                response.namespace
            )));
        }

        check_status(response)?;

        let assertions: Vec<&XmlElement> = response.children_named("Assertion").collect();
        if assertions.is_empty() {
            return Err(ValidationError::protocol("no SAML assertions found"));
        }

        let (assertion, not_before, not_on_or_after) = assertions
            .into_iter()
            .find_map(|a| {
                self.time_window(a, now)
                    .map(|(nb, noa)| (a, nb, noa))
            })
            .ok_or(ValidationError::NoValidAssertionInTimeWindow {
                now,
                tolerance_ms: self.tolerance.as_millis(),
            })?;

        build_assertion(assertion, not_before, not_on_or_after).map(ParsedResponse::new)
    }
}

fn check_status(response: &XmlElement) -> Result<(), ValidationError> {
    let status = match response.child("Status") {
        Some(status) => status,
        None => return Ok(()),
    };
    let code = status
        .child("StatusCode")
        .and_then(|c| c.attribute("Value"))
        .unwrap_or_default();
    if code.is_empty() || code.ends_with("Success") {
        return Ok(());
    }
    Err(ValidationError::ServerRejected {
        code: Some(code.to_string()),
        detail: status
            .child("StatusMessage")
            .map(|m| m.text().to_string())
            .unwrap_or_default(),
    })
}

fn build_assertion(
    assertion: &XmlElement,
    not_before: DateTime<Utc>,
    not_on_or_after: DateTime<Utc>,
) -> Result<Assertion, ValidationError> {
    let statement = assertion
        .child("AuthenticationStatement")
        .ok_or(ValidationError::NoPrincipal)?;
    let name = subject_name(statement)
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::NoPrincipal)?;

    let mut principal_attributes = Attributes::new();
    for attribute_statement in assertion.children_named("AttributeStatement") {
        if subject_name(attribute_statement) != Some(name) {
            debug!("Ignoring SAML attribute statement for another subject");
            continue;
        }
        for attribute in attribute_statement.children_named("Attribute") {
            let Some(attribute_name) = attribute.attribute("AttributeName") else {
                continue;
            };
            for value in attribute.children_named("AttributeValue") {
                principal_attributes.push(attribute_name, value.text());
            }
        }
    }

    let mut assertion_attributes = Attributes::new();
    if let Some(method) = statement.attribute("AuthenticationMethod") {
        assertion_attributes.push(AUTHENTICATION_METHOD_ATTRIBUTE, method);
    }

    let principal = Principal::with_attributes(name, principal_attributes)?;
    let mut result = Assertion::new(principal, not_before)
        .with_valid_until(not_on_or_after)
        .map_err(|_| ValidationError::protocol("assertion NotOnOrAfter precedes NotBefore"))?
        .with_attributes(assertion_attributes);
    if let Some(instant) = statement
        .attribute("AuthenticationInstant")
        .and_then(parse_instant)
    {
        result = result.with_issued_at(instant);
    }
    Ok(result)
}

fn subject_name(statement: &XmlElement) -> Option<&str> {
    statement
        .child("Subject")
        .and_then(|s| s.child("NameIdentifier"))
        .map(XmlElement::text)
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
