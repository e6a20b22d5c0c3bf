// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! WebHarvest: content acquisition and structured extraction for hostile
//! web pages.
//!
//! A [`WebHarvester`] fetches a URL (rendered through a stealth Chromium
//! session, or through the anonymity overlay for `.onion` hosts), normalizes
//! the page to plain text, and answers natural-language queries about it by
//! delegating to a language model. Answers come back in the encoding the
//! query asks for: JSON, CSV, Excel, SQL or HTML.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod format;
pub mod harvester;
pub mod normalize;
pub mod overlay;
pub mod progress;
pub mod renderer;
pub mod route;
pub mod session;
pub mod stealth;

pub use config::HarvestConfig;
pub use error::{HarvestError, Result};
pub use extract::backend::{select_backend, ExtractionBackend};
pub use fetch::{parse_command, Command, FetchRequest, FetchResult};
pub use format::{FormattedResult, OutputFormat};
pub use harvester::{FetchSummary, Reply, WebHarvester};
pub use normalize::normalize;
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSink, ProgressStage};
pub use route::Egress;
pub use session::{Session, SessionSnapshot};
pub use stealth::captcha::{CaptchaHandoff, CaptchaRequest};
