//! Chromium-based renderer using chromiumoxide.

use super::{BrowserLauncher, LaunchOptions, NavigationResult, RenderContext, Renderer};
use crate::config::{BrowserSettings, Viewport};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, ReloadParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. Configured path
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("configured chromium path {} does not exist", path.display());
    }

    // 2. WEBHARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("WEBHARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.webharvest/chromium/
    if let Some(home) = dirs::home_dir() {
        for c in [
            home.join(".webharvest/chromium/chrome-linux64/chrome"),
            home.join(".webharvest/chromium/chrome"),
        ] {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches local Chromium processes, or attaches to a running one when
/// `attach_ws_url` is configured.
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn build_config(&self, options: &LaunchOptions, profile: &Path) -> Result<BrowserConfig> {
        let chrome_path = find_chromium(self.settings.chromium_path.as_deref()).ok_or_else(|| {
            HarvestError::BrowserUnavailable(
                "Chromium not found. Set WEBHARVEST_CHROMIUM_PATH or install chromium.".into(),
            )
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-blink-features=AutomationControlled");

        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        for extra in &self.settings.extra_args {
            builder = builder.arg(extra.clone());
        }

        builder
            .build()
            .map_err(|e| HarvestError::BrowserUnavailable(format!("bad browser config: {e}")))
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(self.start_session(options).await?))
    }
}

impl ChromiumLauncher {
    async fn start_session(&self, options: &LaunchOptions) -> Result<ChromiumSession> {
        if let Some(ws) = &self.settings.attach_ws_url {
            let (browser, handler) = Browser::connect(ws.clone()).await.map_err(|e| {
                HarvestError::BrowserUnavailable(format!("failed to attach to {ws}: {e}"))
            })?;
            tracing::info!("attached to running browser at {ws}");
            return Ok(ChromiumSession::start(browser, handler, None));
        }

        let profile = TempDir::with_prefix("webharvest-profile-")?;
        let config = self.build_config(options, profile.path())?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::BrowserUnavailable(format!("failed to launch Chromium: {e}")))?;
        tracing::debug!(
            headless = options.headless,
            proxied = options.proxy.is_some(),
            "launched Chromium with profile {}",
            profile.path().display()
        );
        Ok(ChromiumSession::start(browser, handler, Some(profile)))
    }
}

/// A Chromium process (or attached browser) plus its temporary profile.
///
/// `shutdown` closes a launched browser and waits for it to exit. Dropping
/// the session without it kills the process and removes the profile only
/// once the process is gone.
pub struct ChromiumSession {
    /// `None` once the browser has been shut down.
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    profile_dir: Option<TempDir>,
}

impl ChromiumSession {
    fn start(
        browser: Browser,
        mut handler: chromiumoxide::Handler,
        profile_dir: Option<TempDir>,
    ) -> Self {
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error: {e}");
                }
            }
        });
        Self {
            browser: Some(browser),
            handler,
            profile_dir,
        }
    }

    fn is_attached(&self) -> bool {
        self.profile_dir.is_none()
    }

    #[cfg(test)]
    fn profile_path(&self) -> Option<PathBuf> {
        self.profile_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

#[async_trait]
impl Renderer for ChromiumSession {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| HarvestError::Browser("browser session is closed".into()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::Browser(format!("failed to create new page: {e}")))?;

        Ok(Box::new(ChromiumContext { page }))
    }

    async fn shutdown(mut self: Box<Self>) -> Result<()> {
        if self.is_attached() {
            tracing::debug!("leaving attached browser running");
            return Ok(());
        }
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        if let Err(e) = browser.close().await {
            tracing::warn!("browser close failed: {e}");
        }
        if let Err(e) = browser.wait().await {
            tracing::warn!("waiting for browser exit failed: {e}");
        }
        tracing::debug!("browser session shut down");
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler.abort();
        let (Some(mut browser), Some(profile)) = (self.browser.take(), self.profile_dir.take())
        else {
            return;
        };
        // The profile directory must outlive the process writing into it.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(Err(e)) = browser.kill().await {
                        tracing::debug!("killing abandoned browser failed: {e}");
                    }
                    if let Err(e) = browser.wait().await {
                        tracing::debug!("waiting for abandoned browser failed: {e}");
                    }
                    drop(profile);
                });
            }
            Err(_) => {
                drop(browser);
                drop(profile);
            }
        }
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
}

fn cdp_err(what: &str, e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Browser(format!("{what}: {e}"))
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| cdp_err("set user agent", e))?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            false,
        );
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("set viewport", e))?;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        let value = serde_json::to_value(headers)?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(value)))
            .await
            .map_err(|e| cdp_err("set extra headers", e))?;
        Ok(())
    }

    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(|e| cdp_err("add init script", e))?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => Err(HarvestError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(HarvestError::NavigationFailed {
                url: url.to_string(),
                reason: format!("timed out after {timeout_ms}ms"),
            }),
        }
    }

    async fn reload(&mut self, timeout_ms: u64) -> Result<()> {
        let reload = async {
            self.page.execute(ReloadParams::default()).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(Duration::from_millis(timeout_ms), reload).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(cdp_err("reload failed", e)),
            Err(_) => Err(HarvestError::Browser(format!(
                "reload timed out after {timeout_ms}ms"
            ))),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| cdp_err("JS execution failed", e))?;

        result
            .into_value()
            .map_err(|e| HarvestError::Browser(format!("failed to convert JS result: {e:?}")))
    }

    async fn get_html(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| cdp_err("failed to get HTML", e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if let Err(e) = self.page.close().await {
            tracing::debug!("page close failed: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_chromium_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_chromium(Some(&fake)), Some(fake));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_and_read() {
        let launcher = ChromiumLauncher::new(BrowserSettings::default());
        let renderer = launcher
            .launch(&LaunchOptions {
                proxy: None,
                headless: true,
            })
            .await
            .expect("failed to launch");
        let mut ctx = renderer.new_context().await.expect("failed to create context");

        ctx.set_user_agent("Mozilla/5.0 (X11; Linux x86_64) WebHarvestTest/1.0")
            .await
            .expect("set_user_agent failed");
        ctx.set_viewport(Viewport {
            width: 1366,
            height: 768,
        })
        .await
        .expect("set_viewport failed");

        let nav = ctx
            .navigate("data:text/html,<h1>Hello</h1><p>World</p>", 10_000)
            .await
            .expect("navigation failed");
        assert!(nav.load_time_ms < 10_000);

        let ua = ctx.execute_js("navigator.userAgent").await.expect("JS failed");
        assert!(ua.as_str().unwrap().contains("WebHarvestTest"));

        let html = ctx.get_html().await.expect("get_html failed");
        assert!(html.contains("<h1>Hello</h1>"));

        ctx.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_dropped_session_removes_profile_after_exit() {
        let launcher = ChromiumLauncher::new(BrowserSettings::default());
        let session = launcher
            .start_session(&LaunchOptions {
                proxy: None,
                headless: true,
            })
            .await
            .expect("failed to launch");
        let profile = session.profile_path().expect("launched sessions own a profile");
        assert!(profile.exists());

        drop(session);
        let deadline = Instant::now() + Duration::from_secs(10);
        while profile.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!profile.exists());
    }
}
