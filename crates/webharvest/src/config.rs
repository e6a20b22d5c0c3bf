// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading, environment overrides, and validation.
//!
//! Resolution order for every setting: explicit value in a JSON config
//! file, then `WEBHARVEST_*` environment variables, then built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Reserved token margin for the prompt and query overhead.
pub const DEFAULT_RESERVED_MARGIN: usize = 1000;

/// Default chunk size in estimated tokens.
pub const DEFAULT_CHUNK_SIZE: usize = 32_000;

/// Default overlap between consecutive chunks in estimated tokens.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Top-level configuration for a [`WebHarvester`](crate::WebHarvester).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub browser: BrowserSettings,
    pub stealth: StealthSettings,
    pub challenge: ChallengeSettings,
    pub pagination: PaginationSettings,
    pub overlay: OverlaySettings,
    pub extraction: ExtractionSettings,
    /// Static HTTP proxy for clearnet fetches.
    pub proxy: Option<String>,
    /// Proxies used in turn, one per fetch. Takes precedence over `proxy`.
    pub proxy_pool: Vec<String>,
}

/// Condition that marks a navigated page as ready to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReadyCondition {
    /// `document.readyState === "complete"`.
    Load,
    /// `document.readyState !== "loading"`.
    DomContentLoaded,
    /// A CSS selector matches at least one element.
    Selector(String),
}

impl ReadyCondition {
    /// JavaScript expression that evaluates to `true` once the condition holds.
    pub fn probe_script(&self) -> String {
        match self {
            ReadyCondition::Load => "document.readyState === 'complete'".to_string(),
            ReadyCondition::DomContentLoaded => "document.readyState !== 'loading'".to_string(),
            ReadyCondition::Selector(css) => {
                // JSON string literals are valid JS string literals.
                let literal = serde_json::Value::String(css.clone()).to_string();
                format!("document.querySelector({literal}) !== null")
            }
        }
    }
}

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Explicit Chromium binary. Falls back to `WEBHARVEST_CHROMIUM_PATH`, then PATH.
    pub chromium_path: Option<PathBuf>,
    pub headless: bool,
    /// Attach to an already running browser (DevTools websocket URL) instead
    /// of launching one. Attached browsers are never terminated by a fetch.
    pub attach_ws_url: Option<String>,
    pub navigation_timeout_ms: u64,
    pub ready_condition: ReadyCondition,
    pub ready_timeout_ms: u64,
    /// Fixed wait after the ready condition before reading content.
    pub settle_delay_ms: u64,
    /// Pool of viewports; one is picked at random per browsing context.
    pub viewports: Vec<Viewport>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chromium_path: None,
            headless: true,
            attach_ws_url: None,
            navigation_timeout_ms: 30_000,
            ready_condition: ReadyCondition::Load,
            ready_timeout_ms: 10_000,
            settle_delay_ms: 2_000,
            viewports: vec![
                Viewport { width: 1920, height: 1080 },
                Viewport { width: 1536, height: 864 },
                Viewport { width: 1440, height: 900 },
                Viewport { width: 1366, height: 768 },
            ],
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthSettings {
    pub user_agents: Vec<String>,
    /// Headers injected into every request of a browsing context.
    pub extra_headers: BTreeMap<String, String>,
    /// Hide `navigator.webdriver` and related automation fingerprints.
    pub mask_automation: bool,
    /// Scroll, move the mouse, and hover before re-checking a challenge.
    pub simulate_human: bool,
}

impl Default for StealthSettings {
    fn default() -> Self {
        let mut extra_headers = BTreeMap::new();
        extra_headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        extra_headers.insert("DNT".to_string(), "1".to_string());
        extra_headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0".to_string(),
            ],
            extra_headers,
            mask_automation: true,
            simulate_human: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    /// Case-insensitive substrings that identify an anti-bot interstitial.
    pub markers: Vec<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            markers: vec![
                "Checking your browser".to_string(),
                "Just a moment...".to_string(),
                "DDoS protection by Cloudflare".to_string(),
                "cf-browser-verification".to_string(),
                "Verify you are human".to_string(),
                "Attention Required! | Cloudflare".to_string(),
                "Please enable JavaScript and cookies to continue".to_string(),
            ],
            max_retries: 3,
            retry_delay_ms: 2_000,
        }
    }
}

/// Randomized delay inserted between consecutive page fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub socks_host: String,
    pub socks_port: u16,
    /// Confirm anonymized egress once before the first overlay fetch.
    pub verify_connection: bool,
    pub check_url: String,
    pub timeout_secs: u64,
    pub user_agents: Vec<String>,
}

impl OverlaySettings {
    /// Proxy URL handed to reqwest. `socks5h` resolves hostnames remotely,
    /// which hidden-service hosts require.
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}:{}", self.socks_host, self.socks_port)
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            socks_host: "127.0.0.1".to_string(),
            socks_port: 9050,
            verify_connection: true,
            check_url: "https://check.torproject.org/api/ip".to_string(),
            timeout_secs: 30,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; rv:115.0) Gecko/20100101 Firefox/115.0".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Model name; its prefix selects the backend (`gpt-`, `gemini-`, `ollama:`).
    pub model: String,
    /// Overrides the backend's context window.
    pub max_tokens: Option<usize>,
    pub reserved_margin: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Concurrent delegate calls for chunked extraction.
    pub chunk_concurrency: usize,
    pub cache_capacity: usize,
    /// Limit on each model call, response body included.
    pub request_timeout_secs: u64,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub ollama_base_url: Option<String>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            reserved_margin: DEFAULT_RESERVED_MARGIN,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            chunk_concurrency: 4,
            cache_capacity: 100,
            request_timeout_secs: 120,
            openai_base_url: None,
            gemini_base_url: None,
            ollama_base_url: None,
        }
    }
}

impl HarvestConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            HarvestError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("WEBHARVEST_CHROMIUM_PATH") {
            self.browser.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup("WEBHARVEST_HEADLESS") {
            self.browser.headless = parse_bool("WEBHARVEST_HEADLESS", &flag)?;
        }
        if let Some(ws) = lookup("WEBHARVEST_ATTACH_WS") {
            self.browser.attach_ws_url = Some(ws);
        }
        if let Some(proxy) = lookup("WEBHARVEST_PROXY") {
            if proxy.contains(',') {
                self.proxy_pool = proxy
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            } else {
                self.proxy = Some(proxy);
                self.proxy_pool.clear();
            }
        }
        if let Some(port) = lookup("WEBHARVEST_TOR_SOCKS_PORT") {
            self.overlay.socks_port = port.parse().map_err(|_| {
                HarvestError::Config(format!("WEBHARVEST_TOR_SOCKS_PORT is not a port: {port}"))
            })?;
        }
        if let Some(model) = lookup("WEBHARVEST_MODEL") {
            self.extraction.model = model;
        }
        if let Some(retries) = lookup("WEBHARVEST_MAX_RETRIES") {
            self.challenge.max_retries = retries.parse().map_err(|_| {
                HarvestError::Config(format!("WEBHARVEST_MAX_RETRIES is not a number: {retries}"))
            })?;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.extraction.ollama_base_url = Some(host);
        }
        Ok(())
    }

    /// Reject settings that would violate pipeline invariants.
    pub fn validate(&self) -> Result<()> {
        let ex = &self.extraction;
        if ex.chunk_size == 0 {
            return Err(HarvestError::Config("chunk_size must be positive".into()));
        }
        if ex.chunk_overlap >= ex.chunk_size {
            return Err(HarvestError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                ex.chunk_overlap, ex.chunk_size
            )));
        }
        if ex.request_timeout_secs == 0 {
            return Err(HarvestError::Config("request_timeout_secs must be positive".into()));
        }
        if ex.chunk_concurrency == 0 {
            return Err(HarvestError::Config("chunk_concurrency must be positive".into()));
        }
        if let Some(max) = ex.max_tokens {
            if ex.reserved_margin >= max {
                return Err(HarvestError::Config(format!(
                    "reserved_margin ({}) must be smaller than max_tokens ({max})",
                    ex.reserved_margin
                )));
            }
        }
        if self.challenge.markers.iter().all(|m| m.trim().is_empty()) {
            return Err(HarvestError::Config("challenge markers must not be empty".into()));
        }
        if self.stealth.user_agents.is_empty() || self.overlay.user_agents.is_empty() {
            return Err(HarvestError::Config("user-agent pools must not be empty".into()));
        }
        if self.browser.viewports.is_empty() {
            return Err(HarvestError::Config("viewport pool must not be empty".into()));
        }
        if self.proxy_pool.iter().any(|p| p.trim().is_empty()) {
            return Err(HarvestError::Config("proxy_pool entries must not be empty".into()));
        }
        if self.pagination.min_delay_ms > self.pagination.max_delay_ms {
            return Err(HarvestError::Config(
                "pagination min_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(HarvestError::Config(format!("{key} is not a boolean: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        HarvestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.json");
        std::fs::write(
            &path,
            r#"{ "challenge": { "max_retries": 5 }, "extraction": { "model": "ollama:llama3" } }"#,
        )
        .unwrap();

        let config = HarvestConfig::load(&path).unwrap();
        assert_eq!(config.challenge.max_retries, 5);
        assert_eq!(config.extraction.model, "ollama:llama3");
        // Untouched sections keep their defaults.
        assert_eq!(config.overlay.socks_port, 9050);
        assert!(!config.challenge.markers.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WEBHARVEST_HEADLESS", "false"),
            ("WEBHARVEST_TOR_SOCKS_PORT", "9150"),
            ("WEBHARVEST_MODEL", "gemini-1.5-flash"),
        ]
        .into_iter()
        .collect();

        let mut config = HarvestConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.overlay.socks_port, 9150);
        assert_eq!(config.overlay.proxy_url(), "socks5h://127.0.0.1:9150");
        assert_eq!(config.extraction.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_env_proxy_list_becomes_pool() {
        let mut config = HarvestConfig::default();
        config
            .apply_env(|k| {
                (k == "WEBHARVEST_PROXY").then(|| "http://a:1, http://b:2,".to_string())
            })
            .unwrap();
        assert_eq!(config.proxy, None);
        assert_eq!(config.proxy_pool, vec!["http://a:1", "http://b:2"]);
        config.validate().unwrap();

        config.proxy_pool.push(" ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = HarvestConfig::default();
        let err = config
            .apply_env(|k| (k == "WEBHARVEST_HEADLESS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_validate_overlap() {
        let mut config = HarvestConfig::default();
        config.extraction.chunk_size = 100;
        config.extraction.chunk_overlap = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_selector_probe_is_quoted() {
        let probe = ReadyCondition::Selector("div[data-x=\"1\"]".into()).probe_script();
        assert_eq!(probe, r#"document.querySelector("div[data-x=\"1\"]") !== null"#);
    }
}
