//! Validator configuration.
//!
//! Built once, validated once, and handed to the validator at construction.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use url::Url;

use crate::validation::error::ConfigError;
use crate::validation::pgt_store::DEFAULT_PGT_RETENTION;
use crate::validation::proxy::{AllowedProxyChains, ProxyChainPolicy};
use crate::validation::transport::resolve_encoding;
use crate::validation::types::Protocol;

/// Default SAML clock-skew tolerance.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_millis(1000);

/// Default bound on a single round-trip to the CAS server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_ENCODING: &str = "UTF-8";

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// CAS server base URL, e.g. `https://cas.example.com/cas`.
    pub server_url_prefix: String,

    pub protocol: Protocol,

    /// Force primary authentication on the server (no SSO reuse).
    pub renew: bool,

    /// Clock-skew tolerance applied to SAML validity windows.
    pub tolerance: Duration,

    /// Callback URL advertised as `pgtUrl` (CAS 2.0/3.0 only).
    pub proxy_callback_url: Option<String>,

    pub accept_any_proxy: bool,
    pub allowed_proxy_chains: AllowedProxyChains,

    /// Character encoding of server responses.
    pub encoding: String,

    pub timeout: Duration,

    /// Extra query parameters appended to the validation URL.
    pub custom_parameters: BTreeMap<String, String>,

    /// How long a received PGT waits to be correlated.
    pub pgt_retention: Duration,
}

impl ValidatorConfig {
    pub fn new(server_url_prefix: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            server_url_prefix: server_url_prefix.into(),
            protocol,
            renew: false,
            tolerance: DEFAULT_TOLERANCE,
            proxy_callback_url: None,
            accept_any_proxy: false,
            allowed_proxy_chains: AllowedProxyChains::default(),
            encoding: DEFAULT_ENCODING.to_string(),
            timeout: DEFAULT_TIMEOUT,
            custom_parameters: BTreeMap::new(),
            pgt_retention: DEFAULT_PGT_RETENTION,
        }
    }

    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_proxy_callback_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_callback_url = Some(url.into());
        self
    }

    pub fn with_accept_any_proxy(mut self, accept: bool) -> Self {
        self.accept_any_proxy = accept;
        self
    }

    pub fn with_allowed_proxy_chains(mut self, chains: AllowedProxyChains) -> Self {
        self.allowed_proxy_chains = chains;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_custom_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_pgt_retention(mut self, retention: Duration) -> Self {
        self.pgt_retention = retention;
        self
    }

    pub fn proxy_chain_policy(&self) -> ProxyChainPolicy {
        ProxyChainPolicy::new(self.accept_any_proxy, self.allowed_proxy_chains.clone())
    }

    /// Check the settings are coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url_prefix.trim().is_empty() {
            return Err(ConfigError::Missing("server_url_prefix".to_string()));
        }
        Url::parse(&self.server_url_prefix)
            .map_err(|e| ConfigError::invalid("server_url_prefix", e.to_string()))?;

        if resolve_encoding(&self.encoding).is_none() {
            return Err(ConfigError::invalid(
                "encoding",
                format!("unknown character encoding '{}'", self.encoding),
            ));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }

        if let Some(callback) = &self.proxy_callback_url {
            if !self.protocol.supports_proxying() {
                return Err(ConfigError::invalid(
                    "proxy_callback_url",
                    format!("protocol {} does not support proxying", self.protocol),
                ));
            }
            Url::parse(callback)
                .map_err(|e| ConfigError::invalid("proxy_callback_url", e.to_string()))?;
        }

        Ok(())
    }

    /// Load from `CAS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup using the `CAS_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url_prefix = lookup("CAS_SERVER_URL_PREFIX")
            .ok_or_else(|| ConfigError::Missing("CAS_SERVER_URL_PREFIX".to_string()))?;
        let protocol = lookup("CAS_PROTOCOL")
            .unwrap_or_else(|| "cas3".to_string())
            .parse()?;

        let mut config = Self::new(server_url_prefix, protocol);
        config.renew = parse_flag(&lookup, "CAS_RENEW")?;
        config.accept_any_proxy = parse_flag(&lookup, "CAS_ACCEPT_ANY_PROXY")?;
        config.proxy_callback_url = lookup("CAS_PROXY_CALLBACK_URL").filter(|v| !v.trim().is_empty());
        if let Some(chains) = lookup("CAS_ALLOWED_PROXY_CHAINS") {
            config.allowed_proxy_chains = AllowedProxyChains::parse(&chains);
        }
        if let Some(encoding) = lookup("CAS_ENCODING") {
            config.encoding = encoding;
        }
        if let Some(ms) = parse_number(&lookup, "CAS_TOLERANCE_MS")? {
            config.tolerance = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "CAS_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_number(&lookup, "CAS_PGT_RETENTION_SECS")? {
            config.pgt_retention = Duration::from_secs(secs);
        }
        if let Some(params) = lookup("CAS_CUSTOM_PARAMETERS") {
            config.custom_parameters = parse_parameters(&params)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| "false".to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, "expected true or false"))
}

fn parse_number<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a number", v)))
        })
        .transpose()
}

/// `name=value` pairs separated by `&`.
fn parse_parameters(spec: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    spec.split('&')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    ConfigError::invalid("CAS_CUSTOM_PARAMETERS", format!("'{}' is not name=value", pair))
                })
        })
        .collect()
}
