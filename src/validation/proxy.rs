//! Proxy chain authorization.

use log::{debug, warn};

use crate::validation::error::ValidationError;

/// Set of proxy chains a service trusts, each an exact ordered sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedProxyChains(Vec<Vec<String>>);

impl AllowedProxyChains {
    pub fn new(chains: Vec<Vec<String>>) -> Self {
        Self(chains)
    }

    /// Parse one chain per line (`\n` or `;`), proxies separated by whitespace.
    pub fn parse(spec: &str) -> Self {
        let chains = spec
            .split(['\n', ';'])
            .map(|line| {
                line.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|chain| !chain.is_empty())
            .collect();
        Self(chains)
    }

    pub fn contains(&self, chain: &[String]) -> bool {
        self.0.iter().any(|allowed| allowed.as_slice() == chain)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Decides whether a returned proxy chain is acceptable.
#[derive(Debug, Clone, Default)]
pub struct ProxyChainPolicy {
    accept_any_proxy: bool,
    allowed_chains: AllowedProxyChains,
}

impl ProxyChainPolicy {
    pub fn new(accept_any_proxy: bool, allowed_chains: AllowedProxyChains) -> Self {
        Self {
            accept_any_proxy,
            allowed_chains,
        }
    }

    /// Whether proxied tickets are expected at all.
    pub fn is_proxy_mode(&self) -> bool {
        self.accept_any_proxy || !self.allowed_chains.is_empty()
    }

    /// Empty chain, then accept-any, then exact sequence match.
    pub fn is_authorized(&self, chain: &[String]) -> bool {
        if chain.is_empty() {
            return true;
        }
        if self.accept_any_proxy {
            debug!("Accepting proxy chain of length {} (accept any)", chain.len());
            return true;
        }
        self.allowed_chains.contains(chain)
    }

    pub fn authorize(&self, chain: &[String]) -> Result<(), ValidationError> {
        if self.is_authorized(chain) {
            return Ok(());
        }
        warn!("Rejecting unauthorized proxy chain {:?}", chain);
        Err(ValidationError::InvalidProxyChain {
            chain: chain.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn strict_policy() -> ProxyChainPolicy {
        ProxyChainPolicy::new(false, AllowedProxyChains::new(vec![chain(&["A", "B"])]))
    }

    #[test]
    fn test_exact_chain_authorized() {
        assert!(strict_policy().is_authorized(&chain(&["A", "B"])));
    }

    #[test]
    fn test_reordered_and_extended_chains_rejected() {
        let policy = strict_policy();
        assert!(!policy.is_authorized(&chain(&["B", "A"])));
        assert!(!policy.is_authorized(&chain(&["A", "B", "C"])));
        assert!(!policy.is_authorized(&chain(&["A"])));
        assert!(matches!(
            policy.authorize(&chain(&["B", "A"])),
            Err(ValidationError::InvalidProxyChain { chain }) if chain == vec!["B", "A"]
        ));
    }

    #[test]
    fn test_empty_chain_always_authorized() {
        assert!(strict_policy().is_authorized(&[]));
        assert!(ProxyChainPolicy::default().is_authorized(&[]));
        assert!(ProxyChainPolicy::new(true, AllowedProxyChains::default()).is_authorized(&[]));
    }

    #[test]
    fn test_accept_any_proxy() {
        let policy = ProxyChainPolicy::new(true, AllowedProxyChains::default());
        assert!(policy.is_proxy_mode());
        assert!(policy.is_authorized(&chain(&["https://anything.example.com/"])));
    }

    #[test]
    fn test_default_policy_rejects_any_chain() {
        let policy = ProxyChainPolicy::default();
        assert!(!policy.is_proxy_mode());
        assert!(!policy.is_authorized(&chain(&["A"])));
    }

    #[test]
    fn test_parse_allowed_chains() {
        let chains = AllowedProxyChains::parse(
            "https://a.example.com https://b.example.com\n\n  https://c.example.com ;https://d",
        );
        assert_eq!(chains.len(), 3);
        assert!(chains.contains(&chain(&["https://a.example.com", "https://b.example.com"])));
        assert!(chains.contains(&chain(&["https://c.example.com"])));
        assert!(chains.contains(&chain(&["https://d"])));
    }
}
