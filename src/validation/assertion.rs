//! Assertion and principal model produced by a successful validation.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::validation::error::ValidationError;
use crate::validation::proxy_retriever::ProxyCapability;

/// Value of a single attribute.
///
/// Single values stay scalar; repeated names are promoted to a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AttributeValue {
    /// All values in encounter order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(v) => vec![v.as_str()],
            AttributeValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            AttributeValue::Single(v) => Some(v),
            AttributeValue::Multiple(vs) => vs.first().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            AttributeValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = AttributeValue::Multiple(vec![first, value]);
            }
            AttributeValue::Multiple(vs) => vs.push(value),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Single(value.to_string())
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Multiple(values)
    }
}

/// Attribute bag keyed by case-sensitive name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a parsed value, promoting to a list on the second occurrence.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.0.entry(name.into()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(AttributeValue::Single(value));
            }
            btree_map::Entry::Occupied(mut slot) => slot.get_mut().push(value),
        }
    }

    /// Replace whatever is stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.0.insert(name.into(), value);
    }

    /// Value stored under `name`, matched case-sensitively.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of distinct attribute names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Authenticated identity.
#[derive(Clone, Serialize)]
pub struct Principal {
    name: String,
    attributes: Attributes,
    #[serde(skip)]
    proxy: Option<ProxyCapability>,
}

impl Principal {
    /// Create a principal; a blank name is rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_attributes(name, Attributes::new())
    }

    /// Create a principal carrying `attributes`; a blank name is rejected.
    pub fn with_attributes(
        name: impl Into<String>,
        attributes: Attributes,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidArgument(
                "principal name must not be blank".to_string(),
            ));
        }
        Ok(Self {
            name,
            attributes,
            proxy: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Whether a proxy-granting ticket was correlated for this principal.
    pub fn can_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Request a proxy ticket for `target_service`.
    ///
    /// Returns `Ok(None)` when the principal has no proxy capability or the
    /// server refused to issue a ticket.
    pub async fn proxy_ticket_for(
        &self,
        target_service: &str,
    ) -> Result<Option<String>, ValidationError> {
        match &self.proxy {
            Some(capability) => capability.proxy_ticket_for(target_service).await,
            None => {
                log::debug!(
                    "No proxy-granting ticket for {}; cannot proxy to {}",
                    self.name,
                    target_service
                );
                Ok(None)
            }
        }
    }

    pub(crate) fn set_proxy_capability(&mut self, capability: ProxyCapability) {
        self.proxy = Some(capability);
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("can_proxy", &self.can_proxy())
            .finish()
    }
}

/// Validated outcome: principal, attributes, and validity window.
#[derive(Debug, Clone, Serialize)]
pub struct Assertion {
    principal: Principal,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
    attributes: Attributes,
}

impl Assertion {
    /// Open-ended assertion valid from `valid_from`.
    pub fn new(principal: Principal, valid_from: DateTime<Utc>) -> Self {
        Self {
            principal,
            valid_from,
            valid_until: None,
            issued_at: None,
            attributes: Attributes::new(),
        }
    }

    /// Bound the validity window; `valid_until` may not precede `valid_from`.
    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Result<Self, ValidationError> {
        if valid_until < self.valid_from {
            return Err(ValidationError::InvalidArgument(format!(
                "validUntil {} precedes validFrom {}",
                valid_until, self.valid_from
            )));
        }
        self.valid_until = Some(valid_until);
        Ok(self)
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    /// Assertion-level attributes, distinct from the principal's.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Valid iff `valid_from <= at` and (`valid_until` absent or `at < valid_until`).
    ///
    /// A SAML 1.1 assertion accepted within the clock-skew tolerance keeps the
    /// server's `NotBefore` as `valid_from`, which may be later than the local
    /// validation time. Such an assertion reports `false` here until the local
    /// clock reaches `NotBefore`, even though validation succeeded.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.map_or(true, |until| at < until)
    }

    /// [`Assertion::is_valid_at`] against the system clock.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub(crate) fn attach_proxy_capability(mut self, capability: ProxyCapability) -> Self {
        self.principal.set_proxy_capability(capability);
        self
    }
}
