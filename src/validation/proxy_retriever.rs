//! Proxy-ticket acquisition for principals holding a proxy-granting ticket.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use encoding_rs::Encoding;
use log::{debug, warn};

use crate::validation::codec::xml::XmlElement;
use crate::validation::codec::RequestOptions;
use crate::validation::error::{TransportError, ValidationError};
use crate::validation::transport::{decode_body, HttpTransport};
use crate::validation::types::ValidationRequest;

/// Exchanges a proxy-granting ticket for a proxy ticket.
#[async_trait]
pub trait ProxyRetriever: Send + Sync {
    /// `Ok(None)` when the server refuses to issue a ticket.
    async fn proxy_ticket_for(
        &self,
        proxy_granting_ticket: &str,
        target_service: &str,
    ) -> Result<Option<String>, ValidationError>;
}

/// Calls `<server>/proxy?pgt=..&targetService=..` and reads the
/// `cas:proxySuccess` / `cas:proxyFailure` response.
pub struct Cas20ProxyRetriever {
    options: RequestOptions,
    transport: Arc<dyn HttpTransport>,
    encoding: &'static Encoding,
}

impl Cas20ProxyRetriever {
    pub fn new(server_url_prefix: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            options: RequestOptions::new(server_url_prefix),
            transport,
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn request(&self, proxy_granting_ticket: &str, target_service: &str) -> ValidationRequest {
        ValidationRequest::get(self.options.endpoint_url(
            "proxy",
            &[("pgt", proxy_granting_ticket), ("targetService", target_service)],
            &[],
        ))
    }
}

impl fmt::Debug for Cas20ProxyRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cas20ProxyRetriever")
            .field("server_url_prefix", &self.options.server_url_prefix)
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

#[async_trait]
impl ProxyRetriever for Cas20ProxyRetriever {
    async fn proxy_ticket_for(
        &self,
        proxy_granting_ticket: &str,
        target_service: &str,
    ) -> Result<Option<String>, ValidationError> {
        let request = self.request(proxy_granting_ticket, target_service);
        let response = self.transport.execute(&request).await?;
        if !(200..300).contains(&response.status) {
            return Err(TransportError::Status(response.status).into());
        }

        let body = decode_body(&response.body, self.encoding);
        parse_proxy_response(&body, target_service)
    }
}

fn parse_proxy_response(body: &str, target_service: &str) -> Result<Option<String>, ValidationError> {
    let root = XmlElement::parse(body)?;

    if let Some(failure) = root.descendant("proxyFailure") {
        warn!(
            "CAS refused proxy ticket for {}: {} {}",
            target_service,
            failure.attribute("code").unwrap_or("UNKNOWN"),
            failure.text()
        );
        return Ok(None);
    }

    match root
        .descendant("proxySuccess")
        .and_then(|s| s.child("proxyTicket"))
        .map(XmlElement::text)
        .filter(|t| !t.is_empty())
    {
        Some(ticket) => {
            debug!("Obtained proxy ticket for {}", target_service);
            Ok(Some(ticket.to_string()))
        }
        None => Err(ValidationError::protocol(
            "proxy response carries neither proxySuccess nor proxyFailure",
        )),
    }
}

/// Proxy-granting ticket bound to the retriever that can redeem it.
#[derive(Clone)]
pub struct ProxyCapability {
    proxy_granting_ticket: String,
    retriever: Arc<dyn ProxyRetriever>,
}

impl ProxyCapability {
    pub fn new(proxy_granting_ticket: impl Into<String>, retriever: Arc<dyn ProxyRetriever>) -> Self {
        Self {
            proxy_granting_ticket: proxy_granting_ticket.into(),
            retriever,
        }
    }

    pub async fn proxy_ticket_for(&self, target_service: &str) -> Result<Option<String>, ValidationError> {
        self.retriever
            .proxy_ticket_for(&self.proxy_granting_ticket, target_service)
            .await
    }
}

impl fmt::Debug for ProxyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCapability").finish_non_exhaustive()
    }
}
