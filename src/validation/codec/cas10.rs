//! CAS 1.0: plain-text `yes`/`no` responses from `/validate`.

use chrono::{DateTime, Utc};

use crate::validation::assertion::{Assertion, Principal};
use crate::validation::codec::{ProtocolCodec, RequestOptions};
use crate::validation::error::ValidationError;
use crate::validation::types::{ParsedResponse, Protocol, ValidationRequest};

#[derive(Debug, Clone)]
pub struct Cas10Codec {
    options: RequestOptions,
}

impl Cas10Codec {
    pub fn new(options: RequestOptions) -> Self {
        Self { options }
    }
}

impl ProtocolCodec for Cas10Codec {
    fn protocol(&self) -> Protocol {
        Protocol::Cas10
    }

    fn build_request(&self, ticket: &str, service: &str, _now: DateTime<Utc>) -> ValidationRequest {
        ValidationRequest::get(
            self.options
                .endpoint_url("validate", &[("ticket", ticket), ("service", service)], &[]),
        )
    }

    fn parse_response(&self, body: &str, now: DateTime<Utc>) -> Result<ParsedResponse, ValidationError> {
        let mut lines = body.lines();

        match lines.next() {
            Some("yes") => {}
            Some("no") => {
                return Err(ValidationError::ServerRejected {
                    code: None,
                    detail: "ticket not recognized".to_string(),
                })
            }
            _ => {
                return Err(ValidationError::protocol(
                    "CAS 1.0 response does not start with 'yes' or 'no'",
                ))
            }
        }

        let name = lines.next().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ValidationError::NoPrincipal);
        }

        let principal = Principal::new(name)?;
        Ok(ParsedResponse::new(Assertion::new(principal, now)))
    }
}
