//! Ticket validator.
//!
//! One workflow shared by every protocol: build the request with the
//! configured codec, perform the round-trip, parse, correlate a PGT-IOU
//! through the store, then apply the proxy-chain policy.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use encoding_rs::Encoding;
use log::{debug, info, warn};

use crate::validation::assertion::Assertion;
use crate::validation::clock::{Clock, SystemClock};
use crate::validation::codec::{codec_for, ProtocolCodec};
use crate::validation::config::ValidatorConfig;
use crate::validation::error::{ConfigError, TransportError, ValidationError};
use crate::validation::pgt_store::ProxyGrantingTicketStorage;
use crate::validation::proxy::ProxyChainPolicy;
use crate::validation::proxy_retriever::{Cas20ProxyRetriever, ProxyCapability, ProxyRetriever};
use crate::validation::transport::{decode_body, resolve_encoding, HttpTransport};
use crate::validation::types::{HttpResponse, ParsedResponse, ValidationRequest};

/// Validates service and proxy tickets against a CAS server.
#[async_trait]
pub trait TicketValidator: Send + Sync {
    /// Validate `ticket` issued for `service`.
    ///
    /// Fails with:
    /// 1. `InvalidArgument` for a blank ticket or service
    /// 2. `Transport` if the server cannot be reached in time
    /// 3. `ProtocolViolation`, `ServerRejected`, `NoPrincipal` or
    ///    `NoValidAssertionInTimeWindow` from the response
    /// 4. `InvalidProxyChain` if the proxy chain is not authorized
    async fn validate(&self, ticket: &str, service: &str) -> Result<Assertion, ValidationError>;
}

/// Progress of a single `validate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationStage {
    Idle,
    RequestBuilt,
    ResponseReceived,
    Parsed,
    Resolved,
    Rejected,
}

struct StageTracker<'a> {
    ticket: &'a str,
    stage: ValidationStage,
}

impl<'a> StageTracker<'a> {
    fn new(ticket: &'a str) -> Self {
        Self {
            ticket,
            stage: ValidationStage::Idle,
        }
    }

    fn advance(&mut self, next: ValidationStage) {
        debug!(
            "Ticket {}: {:?} -> {:?}",
            ticket_prefix(self.ticket),
            self.stage,
            next
        );
        self.stage = next;
    }

    fn reject(&mut self, error: ValidationError) -> ValidationError {
        warn!(
            "Ticket {} rejected after {:?}: {}",
            ticket_prefix(self.ticket),
            self.stage,
            error
        );
        self.stage = ValidationStage::Rejected;
        error
    }
}

/// Validator for the protocol selected in its [`ValidatorConfig`].
pub struct CasTicketValidator {
    config: ValidatorConfig,
    codec: Box<dyn ProtocolCodec>,
    transport: Arc<dyn HttpTransport>,
    policy: ProxyChainPolicy,
    storage: Option<Arc<dyn ProxyGrantingTicketStorage>>,
    proxy_retriever: Option<Arc<dyn ProxyRetriever>>,
    clock: Arc<dyn Clock>,
    encoding: &'static Encoding,
}

impl CasTicketValidator {
    /// Create a validator; the configuration is checked once here.
    pub fn new(config: ValidatorConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let encoding = resolve_encoding(&config.encoding).ok_or_else(|| {
            ConfigError::invalid("encoding", format!("unknown character encoding '{}'", config.encoding))
        })?;

        info!(
            "CAS {} validator for {} (renew={}, proxy mode={})",
            config.protocol,
            config.server_url_prefix,
            config.renew,
            config.proxy_chain_policy().is_proxy_mode()
        );

        Ok(Self {
            codec: codec_for(&config),
            policy: config.proxy_chain_policy(),
            transport,
            storage: None,
            proxy_retriever: None,
            clock: Arc::new(SystemClock),
            encoding,
            config,
        })
    }

    /// Correlate PGT-IOUs through `storage`.
    ///
    /// Unless one was set, proxy tickets are requested from the same server
    /// over the same transport.
    pub fn with_storage(mut self, storage: Arc<dyn ProxyGrantingTicketStorage>) -> Self {
        self.storage = Some(storage);
        if self.proxy_retriever.is_none() {
            self.proxy_retriever = Some(Arc::new(
                Cas20ProxyRetriever::new(self.config.server_url_prefix.clone(), self.transport.clone())
                    .with_encoding(self.encoding),
            ));
        }
        self
    }

    pub fn with_proxy_retriever(mut self, retriever: Arc<dyn ProxyRetriever>) -> Self {
        self.proxy_retriever = Some(retriever);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn ProtocolCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    async fn round_trip(&self, request: &ValidationRequest) -> Result<HttpResponse, TransportError> {
        let timeout = self.config.timeout;
        let response = tokio::time::timeout(timeout, self.transport.execute(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        if !(200..300).contains(&response.status) {
            return Err(TransportError::Status(response.status));
        }
        Ok(response)
    }

    async fn resolve(&self, parsed: ParsedResponse) -> Result<Assertion, ValidationError> {
        let mut assertion = parsed.assertion;

        if let Some(iou) = parsed.proxy_granting_ticket_iou.as_deref() {
            assertion = self.correlate_pgt(assertion, iou).await;
        }

        if !parsed.proxies.is_empty() {
            debug!("Checking proxy chain {:?}", parsed.proxies);
        }
        self.policy.authorize(&parsed.proxies)?;

        Ok(assertion)
    }

    async fn correlate_pgt(&self, assertion: Assertion, iou: &str) -> Assertion {
        let (storage, retriever) = match (&self.storage, &self.proxy_retriever) {
            (Some(storage), Some(retriever)) => (storage, retriever),
            _ => {
                debug!("Response carried PGT-IOU {} but no store is configured", iou);
                return assertion;
            }
        };

        match storage.retrieve(iou).await {
            Some(pgt) => {
                debug!("Correlated PGT-IOU {}", iou);
                assertion.attach_proxy_capability(ProxyCapability::new(pgt, retriever.clone()))
            }
            None => {
                warn!(
                    "No proxy-granting ticket found for IOU {}; principal cannot proxy",
                    iou
                );
                assertion
            }
        }
    }
}

impl fmt::Debug for CasTicketValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasTicketValidator")
            .field("config", &self.config)
            .field("protocol", &self.codec.protocol())
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

#[async_trait]
impl TicketValidator for CasTicketValidator {
    async fn validate(&self, ticket: &str, service: &str) -> Result<Assertion, ValidationError> {
        if ticket.trim().is_empty() {
            return Err(ValidationError::InvalidArgument("ticket must not be blank".to_string()));
        }
        if service.trim().is_empty() {
            return Err(ValidationError::InvalidArgument("service must not be blank".to_string()));
        }

        let mut tracker = StageTracker::new(ticket);
        let now = self.clock.now();

        let request = self.codec.build_request(ticket, service, now);
        tracker.advance(ValidationStage::RequestBuilt);

        let response = self
            .round_trip(&request)
            .await
            .map_err(|e| tracker.reject(e.into()))?;
        tracker.advance(ValidationStage::ResponseReceived);

        let body = decode_body(&response.body, self.encoding);
        let parsed = self
            .codec
            .parse_response(&body, now)
            .map_err(|e| tracker.reject(e))?;
        tracker.advance(ValidationStage::Parsed);

        let assertion = self.resolve(parsed).await.map_err(|e| tracker.reject(e))?;
        tracker.advance(ValidationStage::Resolved);

        info!(
            "Validated ticket {} for {} as {}",
            ticket_prefix(ticket),
            service,
            assertion.principal().name()
        );
        Ok(assertion)
    }
}

/// Leading characters of a ticket, enough to correlate log lines.
fn ticket_prefix(ticket: &str) -> &str {
    match ticket.char_indices().nth(10) {
        Some((index, _)) => &ticket[..index],
        None => ticket,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::assertion::AttributeValue;
    use crate::validation::clock::FixedClock;
    use crate::validation::pgt_store::InMemoryProxyGrantingTicketStorage;
    use crate::validation::proxy::AllowedProxyChains;
    use crate::validation::types::Protocol;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    const SERVICE: &str = "https://app.example.com/";

    /// Replays canned responses in order and records every request.
    struct StubTransport {
        responses: Mutex<Vec<(u16, String)>>,
        requests: Mutex<Vec<ValidationRequest>>,
        delay: Option<Duration>,
    }

    impl StubTransport {
        fn new(responses: Vec<(u16, &str)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|(s, b)| (s, b.to_string()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn ok(body: &str) -> Arc<Self> {
            Self::new(vec![(200, body)])
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![(200, "yes\nalice\n".to_string())]),
                requests: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }

        fn requests(&self) -> Vec<ValidationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn execute(&self, request: &ValidationRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("no canned response left");
            Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            })
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl HttpTransport for FailingTransport {
        async fn execute(&self, request: &ValidationRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Connection {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn config(protocol: Protocol) -> ValidatorConfig {
        ValidatorConfig::new("https://cas.example.com/cas", protocol)
    }

    fn build(config: ValidatorConfig, transport: Arc<dyn HttpTransport>) -> CasTicketValidator {
        CasTicketValidator::new(config, transport).unwrap()
    }

    const ALICE_WITH_IOU: &str = "<cas:serviceResponse><cas:authenticationSuccess><cas:user>alice</cas:user>\
        <cas:proxyGrantingTicket>PGTIOU-1</cas:proxyGrantingTicket>\
        </cas:authenticationSuccess></cas:serviceResponse>";

    #[tokio::test]
    async fn test_uncorrelated_pgt_iou_yields_plain_assertion() {
        let storage: Arc<dyn ProxyGrantingTicketStorage> =
            Arc::new(InMemoryProxyGrantingTicketStorage::default());
        let validator = build(config(Protocol::Cas20), StubTransport::ok(ALICE_WITH_IOU))
            .with_storage(storage);

        let assertion = validator.validate("ST-123", SERVICE).await.unwrap();
        assert_eq!(assertion.principal().name(), "alice");
        assert!(!assertion.principal().can_proxy());
        assert_eq!(
            assertion.principal().proxy_ticket_for("https://backend.example.com/").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_correlated_pgt_grants_proxy_capability() {
        let storage: Arc<dyn ProxyGrantingTicketStorage> =
            Arc::new(InMemoryProxyGrantingTicketStorage::default());
        storage.save("PGTIOU-1", "PGT-1").await;

        let transport = StubTransport::new(vec![
            (200, ALICE_WITH_IOU),
            (
                200,
                "<cas:serviceResponse><cas:proxySuccess><cas:proxyTicket>PT-1</cas:proxyTicket>\
                 </cas:proxySuccess></cas:serviceResponse>",
            ),
        ]);
        let validator = build(
            config(Protocol::Cas20).with_proxy_callback_url("https://app.example.com/proxyCallback"),
            transport.clone(),
        )
        .with_storage(storage.clone());

        let assertion = validator.validate("ST-123", SERVICE).await.unwrap();
        assert!(assertion.principal().can_proxy());
        assert!(storage.retrieve("PGTIOU-1").await.is_none());

        let ticket = assertion
            .principal()
            .proxy_ticket_for("https://backend.example.com/")
            .await
            .unwrap();
        assert_eq!(ticket.as_deref(), Some("PT-1"));

        let requests = transport.requests();
        assert!(requests[0].url.contains("pgtUrl="));
        assert!(requests[1]
            .url
            .starts_with("https://cas.example.com/cas/proxy?pgt=PGT-1&targetService="));
    }

    #[tokio::test]
    async fn test_blank_arguments() {
        let validator = build(config(Protocol::Cas10), StubTransport::new(vec![]));
        for (ticket, service) in [("", SERVICE), ("  ", SERVICE), ("ST-1", ""), ("ST-1", " ")] {
            assert!(matches!(
                validator.validate(ticket, service).await,
                Err(ValidationError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_cas10_round_trip() {
        let transport = StubTransport::ok("yes\nalice\n");
        let validator = build(config(Protocol::Cas10).with_renew(true), transport.clone());

        let assertion = validator.validate("ST-1", SERVICE).await.unwrap();
        assert_eq!(assertion.principal().name(), "alice");
        assert_eq!(
            transport.requests()[0].url,
            "https://cas.example.com/cas/validate?ticket=ST-1&service=https%3A%2F%2Fapp.example.com%2F&renew=true"
        );
    }

    #[tokio::test]
    async fn test_server_rejection() {
        let validator = build(config(Protocol::Cas10), StubTransport::ok("no\n\n"));
        assert!(matches!(
            validator.validate("ST-1", SERVICE).await,
            Err(ValidationError::ServerRejected { .. })
        ));

        let validator = build(
            config(Protocol::Cas30),
            StubTransport::ok(
                "<cas:serviceResponse><cas:authenticationFailure code=\"INVALID_TICKET\">\
                 Ticket ST-1 not recognized</cas:authenticationFailure></cas:serviceResponse>",
            ),
        );
        assert!(matches!(
            validator.validate("ST-1", SERVICE).await,
            Err(ValidationError::ServerRejected { code: Some(code), .. }) if code == "INVALID_TICKET"
        ));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let validator = build(config(Protocol::Cas20), StubTransport::new(vec![(503, "down")]));
        assert!(matches!(
            validator.validate("ST-1", SERVICE).await,
            Err(ValidationError::Transport(TransportError::Status(503)))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let validator = build(config(Protocol::Cas20), Arc::new(FailingTransport));
        assert!(matches!(
            validator.validate("ST-1", SERVICE).await,
            Err(ValidationError::Transport(TransportError::Connection { .. }))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let transport = StubTransport::slow(Duration::from_secs(10));
        let validator = build(
            config(Protocol::Cas10).with_timeout(Duration::from_millis(50)),
            transport,
        );
        assert!(matches!(
            validator.validate("ST-1", SERVICE).await,
            Err(ValidationError::Transport(TransportError::Timeout(t))) if t == Duration::from_millis(50)
        ));
    }

    const PROXIED: &str = "<cas:serviceResponse><cas:authenticationSuccess><cas:user>alice</cas:user>\
        <cas:proxies><cas:proxy>https://b.example.com/</cas:proxy>\
        <cas:proxy>https://a.example.com/</cas:proxy></cas:proxies>\
        </cas:authenticationSuccess></cas:serviceResponse>";

    #[tokio::test]
    async fn test_proxy_chain_policy_applied() {
        let allowed = AllowedProxyChains::parse("https://b.example.com/ https://a.example.com/");
        let validator = build(
            config(Protocol::Cas20).with_allowed_proxy_chains(allowed),
            StubTransport::ok(PROXIED),
        );
        assert!(validator.validate("PT-1", SERVICE).await.is_ok());

        let reordered = AllowedProxyChains::parse("https://a.example.com/ https://b.example.com/");
        let validator = build(
            config(Protocol::Cas20).with_allowed_proxy_chains(reordered),
            StubTransport::ok(PROXIED),
        );
        match validator.validate("PT-1", SERVICE).await {
            Err(ValidationError::InvalidProxyChain { chain }) => {
                assert_eq!(chain, vec!["https://b.example.com/", "https://a.example.com/"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_proxy_mode_uses_proxy_endpoint() {
        let transport = StubTransport::ok(PROXIED);
        let validator = build(
            config(Protocol::Cas30).with_accept_any_proxy(true),
            transport.clone(),
        );
        assert!(validator.validate("PT-1", SERVICE).await.is_ok());
        assert!(transport.requests()[0]
            .url
            .starts_with("https://cas.example.com/cas/p3/proxyValidate?"));
    }

    #[tokio::test]
    async fn test_saml_uses_injected_clock() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let body = r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body>
            <Response xmlns="urn:oasis:names:tc:SAML:1.0:protocol"><Status><StatusCode Value="samlp:Success"/></Status>
            <Assertion xmlns="urn:oasis:names:tc:SAML:1.0:assertion">
                <Conditions NotBefore="2024-05-01T11:59:59.000Z" NotOnOrAfter="2024-05-01T12:00:30.000Z"/>
                <AttributeStatement><Subject><NameIdentifier>alice</NameIdentifier></Subject>
                    <Attribute AttributeName="memberOf"><AttributeValue>staff</AttributeValue><AttributeValue>faculty</AttributeValue></Attribute>
                </AttributeStatement>
                <AuthenticationStatement AuthenticationInstant="2024-05-01T11:59:59.000Z" AuthenticationMethod="urn:oasis:names:tc:SAML:1.0:am:password">
                    <Subject><NameIdentifier>alice</NameIdentifier></Subject>
                </AuthenticationStatement>
            </Assertion></Response></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

        let transport = StubTransport::new(vec![(200, body), (200, body)]);
        let validator = build(config(Protocol::Saml11), transport.clone())
            .with_clock(Arc::new(FixedClock(now)));

        let assertion = validator.validate("ST-1", SERVICE).await.unwrap();
        assert_eq!(assertion.principal().name(), "alice");
        assert_eq!(
            assertion.principal().attributes().get("memberOf"),
            Some(&AttributeValue::from(vec!["staff".to_string(), "faculty".to_string()]))
        );
        let request = &transport.requests()[0];
        assert!(request.url.contains("TARGET="));
        assert!(request.body.as_deref().unwrap().contains("IssueInstant=\"2024-05-01T12:00:00.000Z\""));

        let later = validator.with_clock(Arc::new(FixedClock(now + chrono::Duration::minutes(5))));
        assert!(matches!(
            later.validate("ST-1", SERVICE).await,
            Err(ValidationError::NoValidAssertionInTimeWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_latin1_response_decoding() {
        struct Latin1;
        #[async_trait]
        impl HttpTransport for Latin1 {
            async fn execute(&self, _request: &ValidationRequest) -> Result<HttpResponse, TransportError> {
                Ok(HttpResponse {
                    status: 200,
                    body: b"yes\nJos\xe9\n".to_vec(),
                })
            }
        }

        let validator = build(config(Protocol::Cas10).with_encoding("ISO-8859-1"), Arc::new(Latin1));
        let assertion = validator.validate("ST-1", SERVICE).await.unwrap();
        assert_eq!(assertion.principal().name(), "José");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = CasTicketValidator::new(
            config(Protocol::Cas10).with_proxy_callback_url("https://app.example.com/cb"),
            Arc::new(FailingTransport),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_ticket_prefix() {
        assert_eq!(ticket_prefix("ST-1"), "ST-1");
        assert_eq!(ticket_prefix("ST-1856339-aA5Yuvrxzpv8Tau1cYQ7"), "ST-1856339");
    }
}
