// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Extraction pipeline: normalized content + query → formatted result.
//!
//! 1. No content → [`HarvestError::NoContentYet`].
//! 2. Fingerprint the content; a changed fingerprint clears the cache.
//! 3. Cache hit → return it.
//! 4. Content within the token budget → one delegate call.
//! 5. Otherwise chunk, call the delegate per chunk (bounded concurrency,
//!    chunk order preserved), and merge.
//! 6. Format, cache, return.

pub mod backend;
pub mod cache;
pub mod chunker;
pub mod merge;
pub mod prompts;

use std::sync::Arc;

use futures::StreamExt;

use crate::config::ExtractionSettings;
use crate::error::{HarvestError, Result};
use crate::format::{format, FormattedResult};
use crate::progress::{ProgressSink, ProgressStage};
use crate::session::Session;

use backend::ExtractionBackend;
use cache::fingerprint;
use chunker::{estimate_tokens, Chunker};
use merge::merge_replies;

pub struct ExtractionPipeline {
    backend: Arc<dyn ExtractionBackend>,
    settings: ExtractionSettings,
    chunker: Chunker,
    progress: ProgressSink,
}

impl ExtractionPipeline {
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        settings: ExtractionSettings,
        progress: ProgressSink,
    ) -> Self {
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap);
        Self {
            backend,
            settings,
            chunker,
            progress,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Tokens available for content in a single delegate call.
    pub fn token_budget(&self) -> usize {
        self.settings
            .max_tokens
            .unwrap_or_else(|| self.backend.context_window())
            .saturating_sub(self.settings.reserved_margin)
    }

    pub async fn extract(&self, session: &mut Session, query: &str) -> Result<FormattedResult> {
        let query = query.trim();
        let (content, cache) = session.content_and_cache();
        let content = content
            .filter(|c| !c.trim().is_empty())
            .ok_or(HarvestError::NoContentYet)?;

        let fp = fingerprint(content);
        cache.sync_fingerprint(&fp);
        if let Some(hit) = cache.get(&fp, query) {
            tracing::debug!("query cache hit for {query:?}");
            return Ok(hit.clone());
        }

        self.progress
            .emit(ProgressStage::ExtractionStarted, "Extracting information...");
        let payload = self.deliver(content, query).await?;
        let result = format(&payload, query);

        if !cache.insert(&fp, query, result.clone()) {
            tracing::debug!("answer for {query:?} not cached");
        }
        self.progress.emit(
            ProgressStage::ExtractionComplete,
            format!("Extraction complete ({})", result.kind()),
        );
        Ok(result)
    }

    async fn deliver(&self, content: &str, query: &str) -> Result<String> {
        let tokens = estimate_tokens(content);
        let budget = self.token_budget();
        if tokens <= budget {
            tracing::info!(
                "extracting with {} in one call ({tokens} tokens)",
                self.backend.name()
            );
            return self.backend.deliver_extraction(content, query, "").await;
        }

        let chunks = self.chunker.split(content);
        tracing::info!(
            "content is {tokens} tokens (budget {budget}), extracting in {} chunks",
            chunks.len()
        );

        let backend = &self.backend;
        let replies: Vec<Result<String>> = futures::stream::iter(
            chunks
                .iter()
                .map(|chunk| backend.deliver_extraction(&chunk.text, query, "")),
        )
        .buffered(self.settings.chunk_concurrency.max(1))
        .collect()
        .await;

        let total = replies.len();
        let outcome = merge_replies(replies);
        if outcome.skipped > 0 {
            self.progress.emit(
                ProgressStage::Warning,
                format!("{} of {total} chunk(s) could not be used", outcome.skipped),
            );
        }
        if outcome.skipped == total {
            if let Some(e) = outcome.first_error {
                return Err(e);
            }
        }
        Ok(outcome.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers each chunk with its first line, slower for earlier chunks.
    struct EchoBackend {
        calls: AtomicUsize,
        window: usize,
    }

    #[async_trait]
    impl ExtractionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }
        fn context_window(&self) -> usize {
            self.window
        }
        async fn deliver_extraction(&self, content: &str, _: &str, _: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n as u64 * 5))).await;
            let first = content.lines().next().unwrap_or_default();
            Ok(serde_json::json!([{ "first": first }]).to_string())
        }
    }

    fn pipeline(window: usize, chunk_size: usize) -> (ExtractionPipeline, Arc<EchoBackend>) {
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
            window,
        });
        let settings = ExtractionSettings {
            reserved_margin: 10,
            chunk_size,
            chunk_overlap: 0,
            ..ExtractionSettings::default()
        };
        (
            ExtractionPipeline::new(backend.clone(), settings, ProgressSink::new()),
            backend,
        )
    }

    #[tokio::test]
    async fn test_no_content_yet() {
        let (pipeline, _) = pipeline(1_000, 100);
        let mut session = Session::default();
        let err = pipeline.extract(&mut session, "anything").await.unwrap_err();
        assert!(matches!(err, HarvestError::NoContentYet));
    }

    #[tokio::test]
    async fn test_small_content_is_one_call_and_cached() {
        let (pipeline, backend) = pipeline(1_000, 100);
        let mut session = Session::default();
        session.replace("https://example.com", "<p>alpha</p>", "alpha");

        let first = pipeline.extract(&mut session, "list").await.unwrap();
        let second = pipeline.extract(&mut session, "list").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        pipeline.extract(&mut session, "other").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_large_content_is_chunked_in_order() {
        let (pipeline, backend) = pipeline(60, 20);
        let content = (0..12)
            .map(|i| format!("row{i} a b c d e"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut session = Session::default();
        session.replace("https://example.com", &content, &content);

        let result = pipeline.extract(&mut session, "json").await.unwrap();
        let FormattedResult::Json(text) = result else {
            panic!("expected json");
        };
        let records: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert!(records.len() > 1);
        assert_eq!(records[0]["first"], "row0 a b c d e");
        assert_eq!(records.len(), backend.calls.load(Ordering::SeqCst));
        let firsts: Vec<&str> = records.iter().map(|r| r["first"].as_str().unwrap()).collect();
        let mut sorted = firsts.clone();
        sorted.sort_by_key(|s| s[3..s.find(' ').unwrap()].parse::<u32>().unwrap());
        assert_eq!(firsts, sorted);
    }

    #[test]
    fn test_budget_uses_override_then_window() {
        let (p, _) = pipeline(16_385, 100);
        assert_eq!(p.token_budget(), 16_375);
        let backend = Arc::new(EchoBackend {
            calls: AtomicUsize::new(0),
            window: 16_385,
        });
        let p = ExtractionPipeline::new(
            backend,
            ExtractionSettings {
                max_tokens: Some(5_000),
                ..ExtractionSettings::default()
            },
            ProgressSink::new(),
        );
        assert_eq!(p.token_budget(), 4_000);
    }
}
