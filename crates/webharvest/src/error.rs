// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error kinds for the acquisition and extraction pipeline.
//!
//! Per-page and per-chunk failures are carried inline (inside a
//! [`FetchResult`](crate::fetch::FetchResult) or skipped during a merge);
//! only session-level preconditions reach the caller as an `Err`.

/// All errors that can occur in the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Extraction was requested before any page was fetched.
    #[error("No content yet: fetch a URL before asking for information")]
    NoContentYet,

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// The challenge marker was still present after every reload.
    #[error("Challenge still present on {url} after {attempts} reload(s)")]
    ChallengeUnresolved { url: String, attempts: u32 },

    #[error("Overlay service unreachable: {0}")]
    OverlayUnreachable(String),

    #[error("CAPTCHA unresolved: {0}")]
    CaptchaUnresolved(String),

    #[error("Malformed extraction payload in chunk {chunk}: {reason}")]
    MalformedExtractionPayload { chunk: usize, reason: String },

    #[error("Unsupported format request: {0}")]
    UnsupportedFormatRequest(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// A command against a live automation session failed.
    #[error("Browser automation error: {0}")]
    Browser(String),

    #[error("Extraction backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Short stable identifier for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HarvestError::NoContentYet => "no_content_yet",
            HarvestError::NavigationFailed { .. } => "navigation_failed",
            HarvestError::ChallengeUnresolved { .. } => "challenge_unresolved",
            HarvestError::OverlayUnreachable(_) => "overlay_unreachable",
            HarvestError::CaptchaUnresolved(_) => "captcha_unresolved",
            HarvestError::MalformedExtractionPayload { .. } => "malformed_extraction_payload",
            HarvestError::UnsupportedFormatRequest(_) => "unsupported_format_request",
            HarvestError::InvalidRequest(_) => "invalid_request",
            HarvestError::BrowserUnavailable(_) => "browser_unavailable",
            HarvestError::Browser(_) => "browser",
            HarvestError::Backend(_) => "backend",
            HarvestError::Config(_) => "config",
            HarvestError::Io(_) => "io",
            HarvestError::Json(_) => "json",
        }
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(e: reqwest::Error) -> Self {
        HarvestError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
