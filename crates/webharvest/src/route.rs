// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Egress selection: direct, HTTP proxy, or the anonymity overlay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// Reserved pseudo-TLD of overlay hidden services.
pub const OVERLAY_TLD: &str = "onion";

/// The path a request leaves through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Egress {
    Direct,
    HttpProxy(String),
    AnonymityOverlay,
}

impl Egress {
    pub fn label(&self) -> &'static str {
        match self {
            Egress::Direct => "regular web",
            Egress::HttpProxy(_) => "regular web (proxied)",
            Egress::AnonymityOverlay => "overlay network",
        }
    }
}

/// Supplies an optional HTTP proxy address per request.
#[async_trait]
pub trait ProxySupply: Send + Sync {
    async fn get_proxy(&self) -> Option<String>;
}

/// A fixed proxy, or none.
pub struct StaticProxy(pub Option<String>);

#[async_trait]
impl ProxySupply for StaticProxy {
    async fn get_proxy(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Round-robin over a proxy list.
pub struct RotatingProxies {
    proxies: Vec<String>,
    next: AtomicUsize,
}

impl RotatingProxies {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProxySupply for RotatingProxies {
    async fn get_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[idx].clone())
    }
}

/// A rotating pool when one is configured, else the single proxy (or none).
pub fn configured_supply(proxy: Option<&str>, pool: &[String]) -> Arc<dyn ProxySupply> {
    if pool.is_empty() {
        Arc::new(StaticProxy(proxy.map(str::to_string)))
    } else {
        Arc::new(RotatingProxies::new(pool.to_vec()))
    }
}

/// Whether the URL's host lives under the overlay pseudo-TLD.
pub fn is_overlay_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|host| {
            let host = host.trim_end_matches('.');
            host == OVERLAY_TLD || host.ends_with(&format!(".{OVERLAY_TLD}"))
        })
        .unwrap_or(false)
}

/// Chooses an [`Egress`] per request.
pub struct RouteSelector {
    proxies: Arc<dyn ProxySupply>,
}

impl RouteSelector {
    pub fn new(proxies: Arc<dyn ProxySupply>) -> Self {
        Self { proxies }
    }

    /// Overlay hosts always take the overlay; there is no clearnet fallback.
    pub async fn select(&self, url: &str) -> Egress {
        if is_overlay_host(url) {
            return Egress::AnonymityOverlay;
        }
        match self.proxies.get_proxy().await {
            Some(addr) => Egress::HttpProxy(addr),
            None => Egress::Direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_host_detection() {
        assert!(is_overlay_host("http://exampleabcdefgh.onion/"));
        assert!(is_overlay_host("http://sub.exampleabcdefgh.ONION/page?x=1"));
        assert!(!is_overlay_host("https://onion.example.com/"));
        assert!(!is_overlay_host("https://example.com/onion"));
        assert!(!is_overlay_host("not a url"));
    }

    #[tokio::test]
    async fn test_overlay_ignores_proxy_supply() {
        let selector = RouteSelector::new(Arc::new(StaticProxy(Some(
            "http://proxy.local:8080".into(),
        ))));
        assert_eq!(
            selector.select("http://hiddenservice.onion/").await,
            Egress::AnonymityOverlay
        );
        assert_eq!(
            selector.select("https://example.com/").await,
            Egress::HttpProxy("http://proxy.local:8080".into())
        );
    }

    #[tokio::test]
    async fn test_direct_without_proxy() {
        let selector = RouteSelector::new(Arc::new(StaticProxy(None)));
        assert_eq!(selector.select("https://example.com/").await, Egress::Direct);
    }

    #[tokio::test]
    async fn test_rotating_proxies_cycle() {
        let supply = RotatingProxies::new(vec!["a:1".into(), "b:2".into()]);
        assert_eq!(supply.get_proxy().await.as_deref(), Some("a:1"));
        assert_eq!(supply.get_proxy().await.as_deref(), Some("b:2"));
        assert_eq!(supply.get_proxy().await.as_deref(), Some("a:1"));
        assert_eq!(RotatingProxies::new(vec![]).get_proxy().await, None);
    }

    #[tokio::test]
    async fn test_configured_pool_wins_over_single_proxy() {
        let pool = vec!["http://a:1".to_string(), "http://b:2".to_string()];
        let supply = configured_supply(Some("http://single:3"), &pool);
        assert_eq!(supply.get_proxy().await.as_deref(), Some("http://a:1"));
        assert_eq!(supply.get_proxy().await.as_deref(), Some("http://b:2"));

        let supply = configured_supply(Some("http://single:3"), &[]);
        assert_eq!(supply.get_proxy().await.as_deref(), Some("http://single:3"));
        assert_eq!(configured_supply(None, &[]).get_proxy().await, None);
    }
}
