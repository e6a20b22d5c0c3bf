// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `BrowserLauncher`, `Renderer` and `RenderContext` traits that
//! abstract over the browser engine (currently Chromium via chromiumoxide),
//! plus [`PageReader`], which waits for a navigated page to become ready and
//! reads its HTML.

pub mod chromium;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BrowserSettings, ReadyCondition, Viewport};
use crate::error::Result;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// How a browser session should be started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// `--proxy-server` value for the whole session.
    pub proxy: Option<String>,
    /// Headful sessions are used for CAPTCHA hand-off.
    pub headless: bool,
}

/// Starts (or attaches to) a browser automation session.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Renderer>>;
}

/// A live browser session that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browsing context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Release the browser process and any on-disk profile.
    async fn shutdown(self: Box<Self>) -> Result<()>;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;
    /// Headers sent with every request issued by this context.
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;
    /// Script evaluated in every new document before page scripts run.
    async fn add_init_script(&self, script: &str) -> Result<()>;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Reload the current document with a timeout.
    async fn reload(&mut self, timeout_ms: u64) -> Result<()>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Waits for the ready condition, then the settle delay, then reads HTML.
#[derive(Debug, Clone)]
pub struct PageReader {
    pub ready: ReadyCondition,
    pub ready_timeout: Duration,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
}

impl PageReader {
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self {
            ready: settings.ready_condition.clone(),
            ready_timeout: Duration::from_millis(settings.ready_timeout_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Poll the ready probe until it holds or the timeout passes.
    ///
    /// Returns `false` on timeout; the page is still read in that case.
    pub async fn wait_ready(&self, ctx: &dyn RenderContext) -> bool {
        let probe = self.ready.probe_script();
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            match ctx.execute_js(&probe).await {
                Ok(serde_json::Value::Bool(true)) => return true,
                Ok(_) => {}
                Err(e) => tracing::debug!("ready probe failed: {e}"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn settle_and_read(&self, ctx: &dyn RenderContext) -> Result<String> {
        if !self.wait_ready(ctx).await {
            tracing::warn!(
                "page not ready after {}ms, reading anyway",
                self.ready_timeout.as_millis()
            );
        }
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        ctx.get_html().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Context whose ready probe turns true after a number of polls.
    struct SlowPage {
        polls: Arc<AtomicUsize>,
        ready_after: usize,
    }

    #[async_trait]
    impl RenderContext for SlowPage {
        async fn set_user_agent(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn set_viewport(&self, _: Viewport) -> Result<()> {
            Ok(())
        }
        async fn set_extra_headers(&self, _: &BTreeMap<String, String>) -> Result<()> {
            Ok(())
        }
        async fn add_init_script(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn navigate(&mut self, url: &str, _: u64) -> Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn reload(&mut self, _: u64) -> Result<()> {
            Ok(())
        }
        async fn execute_js(&self, _: &str) -> Result<serde_json::Value> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::Value::Bool(n >= self.ready_after))
        }
        async fn get_html(&self) -> Result<String> {
            Ok("<p>ready</p>".into())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn reader(timeout_ms: u64) -> PageReader {
        PageReader {
            ready: ReadyCondition::Load,
            ready_timeout: Duration::from_millis(timeout_ms),
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_wait_ready_polls_until_true() {
        let polls = Arc::new(AtomicUsize::new(0));
        let page = SlowPage {
            polls: Arc::clone(&polls),
            ready_after: 3,
        };
        assert!(reader(1_000).wait_ready(&page).await);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ready_timeout_still_reads() {
        let page = SlowPage {
            polls: Arc::new(AtomicUsize::new(0)),
            ready_after: usize::MAX,
        };
        let html = reader(20).settle_and_read(&page).await.unwrap();
        assert_eq!(html, "<p>ready</p>");
    }
}
