// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetch orchestration: route selection, browser rendering with stealth and
//! challenge bypass, CAPTCHA hand-off, pagination, and overlay fetches.
//!
//! Per-page failures are recorded in the [`FetchResult`] next to the pages
//! that succeeded. Only failures that prevent the whole fetch (no browser,
//! unreachable overlay, an unusable request) come back as `Err`.

pub mod pagination;
pub mod request;

use std::sync::Arc;

use serde::Serialize;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::overlay::OverlayClient;
use crate::progress::{ProgressSink, ProgressStage};
use crate::renderer::{BrowserLauncher, LaunchOptions, PageReader, RenderContext, Renderer};
use crate::route::{configured_supply, Egress, ProxySupply, RouteSelector};
use crate::stealth::captcha::{extract_site_key, CaptchaHandoff};
use crate::stealth::challenge::{BypassOutcome, ChallengeBypass, ChallengeDetector};
use crate::stealth::StealthProfile;

use pagination::{inter_page_delay, plan_pages, PageTarget};
pub use request::{parse_command, website_name, Command, FetchRequest};

/// What happened to one page.
#[derive(Debug)]
pub enum PageOutcome {
    Content(String),
    /// The challenge marker survived every reload; `content` is the last read.
    Challenged { content: String, attempts: u32 },
    Failed(HarvestError),
}

#[derive(Debug)]
pub struct FetchedPage {
    /// `None` when the request was not paginated.
    pub page: Option<u32>,
    pub url: String,
    pub outcome: PageOutcome,
}

impl FetchedPage {
    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Content(c) | PageOutcome::Challenged { content: c, .. } => Some(c),
            PageOutcome::Failed(_) => None,
        }
    }

    /// Page content, or a marker line for a failed page.
    pub fn raw_text(&self) -> String {
        match &self.outcome {
            PageOutcome::Content(c) | PageOutcome::Challenged { content: c, .. } => c.clone(),
            PageOutcome::Failed(e) => match self.page {
                Some(n) => format!("[page {n} ({}) could not be fetched: {e}]", self.url),
                None => format!("[{} could not be fetched: {e}]", self.url),
            },
        }
    }
}

/// Per-page outcomes in ascending page order.
#[derive(Debug)]
pub struct FetchResult {
    pub egress: Egress,
    pub pages: Vec<FetchedPage>,
}

/// Compact per-page status, for logs and summaries.
#[derive(Debug, Clone, Serialize)]
pub struct PageStatus {
    pub page: Option<u32>,
    pub url: String,
    pub status: &'static str,
}

impl FetchResult {
    /// At least one page produced content (challenged pages count).
    pub fn has_content(&self) -> bool {
        self.pages.iter().any(|p| p.content().is_some())
    }

    /// All pages joined with newlines, failures as marker lines.
    pub fn raw_text(&self) -> String {
        self.pages
            .iter()
            .map(FetchedPage::raw_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().filter_map(|p| p.page).collect()
    }

    pub fn statuses(&self) -> Vec<PageStatus> {
        self.pages
            .iter()
            .map(|p| PageStatus {
                page: p.page,
                url: p.url.clone(),
                status: match &p.outcome {
                    PageOutcome::Content(_) => "ok",
                    PageOutcome::Challenged { .. } => "challenged",
                    PageOutcome::Failed(e) => e.kind(),
                },
            })
            .collect()
    }

    /// The first failure, used when nothing at all could be read.
    pub fn into_first_error(self) -> Option<HarvestError> {
        self.pages.into_iter().find_map(|p| match p.outcome {
            PageOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }
}

/// Drives a [`FetchRequest`] to a [`FetchResult`].
pub struct FetchOrchestrator {
    config: HarvestConfig,
    routes: RouteSelector,
    launcher: Arc<dyn BrowserLauncher>,
    overlay: OverlayClient,
    progress: ProgressSink,
    captcha: Option<CaptchaHandoff>,
    detector: ChallengeDetector,
    reader: PageReader,
}

impl FetchOrchestrator {
    pub fn new(
        config: HarvestConfig,
        launcher: Arc<dyn BrowserLauncher>,
        progress: ProgressSink,
    ) -> Result<Self> {
        let overlay = OverlayClient::new(config.overlay.clone())?;
        let routes = RouteSelector::new(configured_supply(
            config.proxy.as_deref(),
            &config.proxy_pool,
        ));
        let detector = ChallengeDetector::new(&config.challenge.markers);
        let reader = PageReader::from_settings(&config.browser);
        Ok(Self {
            config,
            routes,
            launcher,
            overlay,
            progress,
            captcha: None,
            detector,
            reader,
        })
    }

    pub fn with_proxy_supply(mut self, proxies: Arc<dyn ProxySupply>) -> Self {
        self.routes = RouteSelector::new(proxies);
        self
    }

    pub fn with_captcha_handoff(mut self, handoff: CaptchaHandoff) -> Self {
        self.captcha = Some(handoff);
        self
    }

    pub fn with_overlay_client(mut self, overlay: OverlayClient) -> Self {
        self.overlay = overlay;
        self
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let egress = self.routes.select(request.url()).await;
        self.progress.emit(
            ProgressStage::FetchStarted,
            format!("Fetching content from {}...", website_name(request.url())),
        );
        tracing::info!("fetching {} via {}", request.url(), egress.label());

        match egress {
            Egress::AnonymityOverlay => self.fetch_overlay(request).await,
            other => self.fetch_rendered(request, other).await,
        }
    }

    async fn fetch_overlay(&self, request: &FetchRequest) -> Result<FetchResult> {
        if request.page_range().is_some() {
            self.warn("page ranges are ignored for overlay-network URLs");
        }
        if request.captcha_mode() {
            self.warn("CAPTCHA mode is ignored for overlay-network URLs");
        }
        let body = self.overlay.fetch(request.url()).await?;
        self.progress.emit(
            ProgressStage::PageFetched,
            format!("Fetched {} over the overlay network", request.url()),
        );
        Ok(FetchResult {
            egress: Egress::AnonymityOverlay,
            pages: vec![FetchedPage {
                page: None,
                url: request.url().to_string(),
                outcome: PageOutcome::Content(body),
            }],
        })
    }

    async fn fetch_rendered(&self, request: &FetchRequest, egress: Egress) -> Result<FetchResult> {
        let plan = plan_pages(request.url(), request.page_range(), request.url_pattern())?;
        if let Some(warning) = &plan.warning {
            self.warn(warning);
        }

        let options = LaunchOptions {
            proxy: match &egress {
                Egress::HttpProxy(addr) => Some(addr.clone()),
                _ => None,
            },
            headless: self.config.browser.headless && !request.captcha_mode(),
        };
        let renderer = self.launcher.launch(&options).await?;

        let pages = self
            .fetch_pages(renderer.as_ref(), &plan.targets, request.captcha_mode())
            .await;

        if let Err(e) = renderer.shutdown().await {
            tracing::warn!("browser shutdown failed: {e}");
        }
        Ok(FetchResult { egress, pages })
    }

    async fn fetch_pages(
        &self,
        renderer: &dyn Renderer,
        targets: &[PageTarget],
        captcha_mode: bool,
    ) -> Vec<FetchedPage> {
        let mut pages = Vec::with_capacity(targets.len());
        let mut captcha_abandoned: Option<String> = None;

        for (i, target) in targets.iter().enumerate() {
            if let Some(reason) = &captcha_abandoned {
                pages.push(FetchedPage {
                    page: target.page,
                    url: target.url.clone(),
                    outcome: PageOutcome::Failed(HarvestError::CaptchaUnresolved(reason.clone())),
                });
                continue;
            }
            if i > 0 {
                tokio::time::sleep(inter_page_delay(&self.config.pagination)).await;
            }

            let outcome = match self.fetch_page(renderer, target, captcha_mode).await {
                Ok(outcome) => outcome,
                Err(HarvestError::CaptchaUnresolved(reason)) => {
                    tracing::warn!("CAPTCHA on {} unresolved: {reason}", target.url);
                    captcha_abandoned = Some(reason.clone());
                    PageOutcome::Failed(HarvestError::CaptchaUnresolved(reason))
                }
                Err(e) => {
                    tracing::warn!("fetching {} failed: {e}", target.url);
                    PageOutcome::Failed(e)
                }
            };

            let label = target
                .page
                .map(|n| format!("page {n}"))
                .unwrap_or_else(|| "page".to_string());
            self.progress.emit(
                ProgressStage::PageFetched,
                match &outcome {
                    PageOutcome::Content(_) => format!("Fetched {label} ({})", target.url),
                    PageOutcome::Challenged { attempts, .. } => format!(
                        "Fetched {label} ({}), challenge still present after {attempts} reload(s)",
                        target.url
                    ),
                    PageOutcome::Failed(e) => format!("Failed {label} ({}): {e}", target.url),
                },
            );
            pages.push(FetchedPage {
                page: target.page,
                url: target.url.clone(),
                outcome,
            });
        }
        pages
    }

    async fn fetch_page(
        &self,
        renderer: &dyn Renderer,
        target: &PageTarget,
        captcha_mode: bool,
    ) -> Result<PageOutcome> {
        let mut ctx = renderer.new_context().await?;
        let result = self.render_page(ctx.as_mut(), &target.url, captcha_mode).await;
        if let Err(e) = ctx.close().await {
            tracing::debug!("closing context for {} failed: {e}", target.url);
        }
        result
    }

    async fn render_page(
        &self,
        ctx: &mut dyn RenderContext,
        url: &str,
        captcha_mode: bool,
    ) -> Result<PageOutcome> {
        let profile = StealthProfile::random(&self.config.stealth, &self.config.browser.viewports);
        profile.apply(&*ctx).await?;

        let nav = ctx
            .navigate(url, self.config.browser.navigation_timeout_ms)
            .await?;
        tracing::debug!("navigated to {} in {}ms", nav.final_url, nav.load_time_ms);

        let content = self.reader.settle_and_read(&*ctx).await?;

        if captcha_mode {
            let handoff = self.captcha.as_ref().ok_or_else(|| {
                HarvestError::CaptchaUnresolved("no CAPTCHA resolver is attached".into())
            })?;
            let site_key = extract_site_key(&content);
            self.progress.emit(
                ProgressStage::CaptchaWaiting,
                format!("Solve the CAPTCHA for {url} in the browser window"),
            );
            handoff.wait_for_resolution(url, site_key).await?;
            return Ok(PageOutcome::Content(self.reader.settle_and_read(&*ctx).await?));
        }

        let bypass = ChallengeBypass {
            detector: &self.detector,
            settings: &self.config.challenge,
            reader: &self.reader,
            progress: &self.progress,
            simulate_human: self.config.stealth.simulate_human,
            navigation_timeout_ms: self.config.browser.navigation_timeout_ms,
        };
        Ok(match bypass.run(ctx, url, content).await? {
            BypassOutcome::Clear { content, .. } => PageOutcome::Content(content),
            BypassOutcome::Unresolved { content, reloads } => {
                let info = HarvestError::ChallengeUnresolved {
                    url: url.to_string(),
                    attempts: reloads,
                };
                self.warn(&info.to_string());
                PageOutcome::Challenged {
                    content,
                    attempts: reloads,
                }
            }
        })
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        self.progress.emit(ProgressStage::Warning, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, outcome: PageOutcome) -> FetchedPage {
        FetchedPage {
            page: Some(n),
            url: format!("https://example.com/?page={n}"),
            outcome,
        }
    }

    #[test]
    fn test_raw_text_keeps_failure_markers_in_place() {
        let result = FetchResult {
            egress: Egress::Direct,
            pages: vec![
                page(1, PageOutcome::Content("<p>one</p>".into())),
                page(
                    2,
                    PageOutcome::Failed(HarvestError::NavigationFailed {
                        url: "https://example.com/?page=2".into(),
                        reason: "timed out".into(),
                    }),
                ),
                page(
                    3,
                    PageOutcome::Challenged {
                        content: "<p>three</p>".into(),
                        attempts: 3,
                    },
                ),
            ],
        };
        let lines: Vec<String> = result.raw_text().lines().map(String::from).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "<p>one</p>");
        assert!(lines[1].starts_with("[page 2"));
        assert!(lines[1].contains("timed out"));
        assert_eq!(lines[2], "<p>three</p>");
        assert!(result.has_content());
        assert_eq!(result.page_numbers(), vec![1, 2, 3]);
        let statuses: Vec<_> = result.statuses().iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec!["ok", "navigation_failed", "challenged"]);
    }

    #[test]
    fn test_all_failed_has_no_content() {
        let result = FetchResult {
            egress: Egress::Direct,
            pages: vec![page(
                1,
                PageOutcome::Failed(HarvestError::CaptchaUnresolved("cancelled".into())),
            )],
        };
        assert!(!result.has_content());
        assert_eq!(result.into_first_error().map(|e| e.kind()), Some("captcha_unresolved"));
    }
}
