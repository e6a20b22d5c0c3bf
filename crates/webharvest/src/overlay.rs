// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Plain HTTP fetches through the anonymity overlay's local SOCKS endpoint.
//!
//! No rendering happens on this route: one GET per request, with browser-like
//! headers drawn at random. Every failure surfaces as
//! [`HarvestError::OverlayUnreachable`]; there is no clearnet fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use serde::Deserialize;

use crate::config::OverlaySettings;
use crate::error::{HarvestError, Result};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Deserialize)]
struct EgressCheck {
    #[serde(rename = "IsTor", default)]
    is_tor: bool,
    #[serde(rename = "IP", default)]
    ip: Option<String>,
}

/// HTTP client bound to the overlay proxy.
pub struct OverlayClient {
    client: reqwest::Client,
    settings: OverlaySettings,
    verified: AtomicBool,
}

impl OverlayClient {
    pub fn new(settings: OverlaySettings) -> Result<Self> {
        let proxy_url = settings.proxy_url();
        let proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| HarvestError::Config(format!("invalid overlay proxy {proxy_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build overlay client: {e}")))?;
        Ok(Self::with_client(client, settings))
    }

    /// Use a pre-built client (tests point this at a local server).
    pub fn with_client(client: reqwest::Client, settings: OverlaySettings) -> Self {
        Self {
            client,
            settings,
            verified: AtomicBool::new(false),
        }
    }

    fn browser_headers(&self) -> HeaderMap {
        let ua = self
            .settings
            .user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT);

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(ua) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("dnt", HeaderValue::from_static("1"));
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
        headers
    }

    /// Confirm traffic leaves through the overlay. Runs at most once per
    /// client unless it fails.
    pub async fn verify(&self) -> Result<()> {
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }
        let check: EgressCheck = self
            .client
            .get(&self.settings.check_url)
            .headers(self.browser_headers())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::OverlayUnreachable(format!("egress check failed: {e}")))?
            .json()
            .await
            .map_err(|e| HarvestError::OverlayUnreachable(format!("egress check unreadable: {e}")))?;

        if !check.is_tor {
            return Err(HarvestError::OverlayUnreachable(
                "egress check reports traffic is not anonymized".into(),
            ));
        }
        tracing::info!(
            "overlay egress verified (exit {})",
            check.ip.as_deref().unwrap_or("unknown")
        );
        self.verified.store(true, Ordering::Release);
        Ok(())
    }

    /// GET `url` through the overlay and return the body.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        if self.settings.verify_connection {
            self.verify().await?;
        }

        let response = self
            .client
            .get(url)
            .headers(self.browser_headers())
            .send()
            .await
            .map_err(|e| HarvestError::OverlayUnreachable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::OverlayUnreachable(format!(
                "{url} returned HTTP {}",
                status.as_u16()
            )));
        }
        let body = response.text().await.map_err(|e| {
            HarvestError::OverlayUnreachable(format!("reading body of {url} failed: {e}"))
        })?;
        tracing::debug!("overlay fetch of {url} returned {} bytes", body.len());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer, verify: bool) -> OverlaySettings {
        OverlaySettings {
            verify_connection: verify,
            check_url: format!("{}/api/ip", server.uri()),
            timeout_secs: 5,
            ..OverlaySettings::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_verifies_once_then_gets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"IsTor": true, "IP": "198.51.100.7"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/listing"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hidden</p>"))
            .expect(2)
            .mount(&server)
            .await;

        let overlay =
            OverlayClient::with_client(reqwest::Client::new(), settings_for(&server, true));
        let url = format!("{}/listing", server.uri());
        assert_eq!(overlay.fetch(&url).await.unwrap(), "<p>hidden</p>");
        assert_eq!(overlay.fetch(&url).await.unwrap(), "<p>hidden</p>");
    }

    #[tokio::test]
    async fn test_unanonymized_egress_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"IsTor": false})))
            .mount(&server)
            .await;

        let overlay =
            OverlayClient::with_client(reqwest::Client::new(), settings_for(&server, true));
        let err = overlay.fetch(&format!("{}/x", server.uri())).await.unwrap_err();
        assert_eq!(err.kind(), "overlay_unreachable");
    }

    #[tokio::test]
    async fn test_error_status_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let overlay =
            OverlayClient::with_client(reqwest::Client::new(), settings_for(&server, false));
        let err = overlay.fetch(&format!("{}/gone", server.uri())).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_closed_socks_port_is_unreachable() {
        let overlay = OverlayClient::new(OverlaySettings {
            socks_port: 1,
            verify_connection: false,
            timeout_secs: 5,
            ..OverlaySettings::default()
        })
        .unwrap();
        let err = overlay
            .fetch("http://exampleexampleexample.onion/")
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::OverlayUnreachable(_)));
    }
}
