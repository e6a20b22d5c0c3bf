// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session-owning facade over fetch, normalize and extract.
//!
//! `WebHarvester` takes `&mut self` for every operation, so a session runs
//! one operation at a time. [`WebHarvester::process`] accepts a raw input
//! line and always produces a [`Reply`], turning errors into messages.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::extract::backend::{select_backend, ExtractionBackend};
use crate::extract::ExtractionPipeline;
use crate::fetch::{parse_command, Command, FetchOrchestrator, FetchRequest, PageStatus};
use crate::format::FormattedResult;
use crate::normalize::normalize;
use crate::overlay::OverlayClient;
use crate::progress::{ProgressReceiver, ProgressSink, ProgressStage};
use crate::renderer::chromium::ChromiumLauncher;
use crate::renderer::BrowserLauncher;
use crate::route::{Egress, ProxySupply};
use crate::session::{Session, SessionSnapshot};
use crate::stealth::captcha::CaptchaHandoff;

/// What a successful fetch installed in the session.
#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub url: String,
    pub egress: Egress,
    pub pages: Vec<PageStatus>,
    pub normalized_chars: usize,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self
            .pages
            .iter()
            .filter_map(|p| p.page.map(|n| n.to_string()))
            .collect();
        let pages = if numbers.is_empty() {
            String::new()
        } else {
            format!(" (pages: {})", numbers.join(", "))
        };
        write!(
            f,
            "I've fetched and preprocessed the content from {} via {}{pages}. \
             What would you like to know about it?",
            self.url,
            self.egress.label()
        )
    }
}

/// Outcome of one input line.
#[derive(Debug)]
pub enum Reply {
    Fetched(FetchSummary),
    Extracted(FormattedResult),
    Error(HarvestError),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Fetched(summary) => write!(f, "{summary}"),
            Reply::Extracted(result) => write!(f, "{result}"),
            Reply::Error(e) => write!(f, "Error: {e}"),
        }
    }
}

pub struct WebHarvester {
    orchestrator: FetchOrchestrator,
    pipeline: ExtractionPipeline,
    session: Session,
    progress: ProgressSink,
    cache_capacity: usize,
}

impl WebHarvester {
    /// Chromium rendering and the backend named by `config.extraction.model`.
    pub fn new(config: HarvestConfig) -> Result<Self> {
        config.validate()?;
        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        let backend = select_backend(&config.extraction)?;
        Self::with_parts(config, launcher, backend)
    }

    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: HarvestConfig,
        launcher: Arc<dyn BrowserLauncher>,
        backend: Arc<dyn ExtractionBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let progress = ProgressSink::new();
        let cache_capacity = config.extraction.cache_capacity;
        let pipeline =
            ExtractionPipeline::new(backend, config.extraction.clone(), progress.clone());
        let orchestrator = FetchOrchestrator::new(config, launcher, progress.clone())?;
        Ok(Self {
            orchestrator,
            pipeline,
            session: Session::new(cache_capacity),
            progress,
            cache_capacity,
        })
    }

    pub fn with_captcha_handoff(mut self, handoff: CaptchaHandoff) -> Self {
        self.orchestrator = self.orchestrator.with_captcha_handoff(handoff);
        self
    }

    pub fn with_proxy_supply(mut self, proxies: Arc<dyn ProxySupply>) -> Self {
        self.orchestrator = self.orchestrator.with_proxy_supply(proxies);
        self
    }

    pub fn with_overlay_client(mut self, overlay: OverlayClient) -> Self {
        self.orchestrator = self.orchestrator.with_overlay_client(overlay);
        self
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.progress.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn backend_name(&self) -> &str {
        self.pipeline.backend_name()
    }

    pub fn restore_session(&mut self, snapshot: SessionSnapshot) {
        self.session = Session::restore(snapshot, self.cache_capacity);
    }

    /// Fetch, normalize and install the content as the new session.
    ///
    /// The session is left untouched unless at least one page has content.
    pub async fn fetch(&mut self, request: &FetchRequest) -> Result<FetchSummary> {
        let result = self.orchestrator.fetch(request).await?;
        if !result.has_content() {
            let error = result
                .into_first_error()
                .unwrap_or_else(|| HarvestError::NavigationFailed {
                    url: request.url().to_string(),
                    reason: "no page produced content".into(),
                });
            return Err(error);
        }

        let raw = result.raw_text();
        let normalized = normalize(&raw);
        self.session
            .replace_via(request.url(), &raw, &normalized, result.egress.clone());
        self.progress.emit(
            ProgressStage::ContentReady,
            format!("Content ready ({} characters)", normalized.len()),
        );
        tracing::info!(
            "session updated from {} ({} page(s))",
            request.url(),
            result.pages.len()
        );

        Ok(FetchSummary {
            url: request.url().to_string(),
            egress: result.egress.clone(),
            pages: result.statuses(),
            normalized_chars: normalized.chars().count(),
        })
    }

    /// Answer a question about the current content.
    pub async fn extract(&mut self, query: &str) -> Result<FormattedResult> {
        self.pipeline.extract(&mut self.session, query).await
    }

    /// Handle one input line: a fetch command or a question.
    pub async fn process(&mut self, input: &str) -> Reply {
        let outcome = match parse_command(input) {
            Ok(Command::Fetch(request)) => self.fetch(&request).await.map(Reply::Fetched),
            Ok(Command::Query(query)) => self.extract(&query).await.map(Reply::Extracted),
            Err(e) => Err(e),
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!("request failed: {e}");
            Reply::Error(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_summary_message() {
        let summary = FetchSummary {
            url: "https://example.com/list".into(),
            egress: Egress::Direct,
            pages: vec![
                PageStatus {
                    page: Some(1),
                    url: "https://example.com/list?page=1".into(),
                    status: "ok",
                },
                PageStatus {
                    page: Some(2),
                    url: "https://example.com/list?page=2".into(),
                    status: "ok",
                },
            ],
            normalized_chars: 42,
        };
        assert_eq!(
            summary.to_string(),
            "I've fetched and preprocessed the content from https://example.com/list \
             via regular web (pages: 1, 2). What would you like to know about it?"
        );
    }

    #[test]
    fn test_error_reply_message() {
        let reply = Reply::Error(HarvestError::NoContentYet);
        assert!(reply.to_string().starts_with("Error: No content yet"));
    }
}
