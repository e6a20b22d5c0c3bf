//! Anti-bot challenge detection and the reload-retry bypass.

use std::time::Duration;

use crate::config::ChallengeSettings;
use crate::error::Result;
use crate::progress::{ProgressSink, ProgressStage};
use crate::renderer::{PageReader, RenderContext};

/// Case-insensitive substring match against a list of markers.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// The first marker found in `content`, if any.
    pub fn detect(&self, content: &str) -> Option<&str> {
        let haystack = content.to_lowercase();
        self.markers
            .iter()
            .find(|m| haystack.contains(m.as_str()))
            .map(String::as_str)
    }
}

/// Final state of a page after the bypass loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassOutcome {
    Clear { content: String, reloads: u32 },
    /// The marker survived every reload; `content` is the last read.
    Unresolved { content: String, reloads: u32 },
}

impl BypassOutcome {
    pub fn reloads(&self) -> u32 {
        match self {
            BypassOutcome::Clear { reloads, .. } | BypassOutcome::Unresolved { reloads, .. } => {
                *reloads
            }
        }
    }
}

/// Reload-and-recheck loop bounded by `max_retries`.
pub struct ChallengeBypass<'a> {
    pub detector: &'a ChallengeDetector,
    pub settings: &'a ChallengeSettings,
    pub reader: &'a PageReader,
    pub progress: &'a ProgressSink,
    pub simulate_human: bool,
    pub navigation_timeout_ms: u64,
}

impl ChallengeBypass<'_> {
    /// Run the loop on content already read from `ctx`.
    ///
    /// A failed reload or read ends the loop early with the last content;
    /// the page is reported as still challenged rather than failed.
    pub async fn run(
        &self,
        ctx: &mut dyn RenderContext,
        url: &str,
        initial: String,
    ) -> Result<BypassOutcome> {
        let mut content = initial;
        let mut reloads = 0;

        while let Some(marker) = self.detector.detect(&content) {
            if reloads >= self.settings.max_retries {
                tracing::warn!("challenge on {url} survived {reloads} reload(s)");
                return Ok(BypassOutcome::Unresolved { content, reloads });
            }
            reloads += 1;
            self.progress.emit(
                ProgressStage::ChallengeDetected,
                format!(
                    "Challenge detected on {url} ({marker:?}), retrying ({reloads}/{})",
                    self.settings.max_retries
                ),
            );
            tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;

            if let Err(e) = ctx.reload(self.navigation_timeout_ms).await {
                tracing::warn!("reload of {url} failed: {e}");
                return Ok(BypassOutcome::Unresolved { content, reloads });
            }
            if self.simulate_human {
                if let Err(e) = super::simulate_human(&*ctx).await {
                    tracing::debug!("human simulation failed on {url}: {e}");
                }
            }
            match self.reader.settle_and_read(&*ctx).await {
                Ok(html) => content = html,
                Err(e) => {
                    tracing::warn!("re-reading {url} failed: {e}");
                    return Ok(BypassOutcome::Unresolved { content, reloads });
                }
            }
        }

        if reloads > 0 {
            tracing::info!("challenge on {url} cleared after {reloads} reload(s)");
        }
        Ok(BypassOutcome::Clear { content, reloads })
    }
}
