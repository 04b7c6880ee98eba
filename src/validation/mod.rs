//! CAS ticket validation.
//!
//! Validates service and proxy tickets against a CAS server over CAS 1.0,
//! 2.0, 3.0 or SAML 1.1, correlating proxy-granting tickets delivered to the
//! proxy callback with the IOU carried in the validation response.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  build/parse  ┌──────────────────┐   execute   ┌───────────────┐
//! │ ProtocolCodec │◀─────────────▶│ CasTicketValidator│───────────▶│ HttpTransport │
//! │ cas1/2/3/saml │               │  (TicketValidator)│            │   (reqwest)   │
//! └───────────────┘               └──────────────────┘             └───────────────┘
//!                                    │            │
//!                         retrieve   │            │ authorize
//!                                    ▼            ▼
//! ┌───────────────┐    save   ┌──────────────┐  ┌──────────────────┐
//! │ proxy callback│──────────▶│  PGT storage │  │ ProxyChainPolicy │
//! │    (axum)     │           │ (moka, TTL)  │  └──────────────────┘
//! └───────────────┘           └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cas_client::validation::{
//!     CasTicketValidator, InMemoryProxyGrantingTicketStorage, Protocol, ReqwestTransport,
//!     TicketValidator, ValidatorConfig,
//! };
//!
//! let config = ValidatorConfig::new("https://cas.example.com/cas", Protocol::Cas30)
//!     .with_proxy_callback_url("https://app.example.com/proxyCallback");
//! let transport = Arc::new(ReqwestTransport::new(config.timeout)?);
//! let storage = Arc::new(InMemoryProxyGrantingTicketStorage::new(config.pgt_retention));
//! let validator = CasTicketValidator::new(config, transport)?.with_storage(storage);
//!
//! match validator.validate(&ticket, "https://app.example.com/").await {
//!     Ok(assertion) => { /* establish session for assertion.principal() */ }
//!     Err(e) => { /* deny */ }
//! }
//! ```

pub mod assertion;
pub mod callback;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod pgt_store;
pub mod proxy;
pub mod proxy_retriever;
pub mod transport;
pub mod types;
pub mod validator;

pub use assertion::{Assertion, AttributeValue, Attributes, Principal};
pub use callback::{
    proxy_callback, proxy_callback_form, proxy_callback_router, receive_proxy_granting_ticket,
    PROXY_SUCCESS_RESPONSE,
};
pub use clock::{Clock, FixedClock, IdGenerator, RandomIdGenerator, SystemClock};
pub use codec::{codec_for, ProtocolCodec, RequestOptions};
pub use config::ValidatorConfig;
pub use error::{ConfigError, TransportError, ValidationError};
pub use pgt_store::{
    spawn_cleaner, InMemoryProxyGrantingTicketStorage, ProxyGrantingTicketStorage,
    DEFAULT_MAX_PENDING_ENTRIES, DEFAULT_PGT_RETENTION,
};
pub use proxy::{AllowedProxyChains, ProxyChainPolicy};
pub use proxy_retriever::{Cas20ProxyRetriever, ProxyCapability, ProxyRetriever};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{HttpMethod, HttpResponse, ParsedResponse, Protocol, ValidationRequest};
pub use validator::{CasTicketValidator, TicketValidator};
