//! Fetch requests and the `<url> [pages] [pattern] [-captcha]` command form.

use url::Url;

use super::pagination::{parse_page_range, PagePattern};
use crate::error::{HarvestError, Result};

/// A validated request to fetch one URL (optionally paginated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    url: String,
    page_range: Option<Vec<u32>>,
    url_pattern: Option<PagePattern>,
    captcha_mode: bool,
}

impl FetchRequest {
    /// Accepts absolute `http`/`https` URLs with a host.
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| HarvestError::InvalidRequest(format!("invalid URL {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(HarvestError::InvalidRequest(format!(
                "only http(s) URLs with a host can be fetched, got {url:?}"
            )));
        }
        Ok(Self {
            url: url.trim().to_string(),
            page_range: None,
            url_pattern: None,
            captcha_mode: false,
        })
    }

    pub fn with_pages(mut self, range: &str) -> Result<Self> {
        self.page_range = Some(parse_page_range(range)?);
        Ok(self)
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.url_pattern = Some(PagePattern::parse_override(pattern)?);
        Ok(self)
    }

    pub fn with_captcha(mut self, captcha_mode: bool) -> Self {
        self.captcha_mode = captcha_mode;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn page_range(&self) -> Option<&[u32]> {
        self.page_range.as_deref()
    }

    pub fn url_pattern(&self) -> Option<&PagePattern> {
        self.url_pattern.as_ref()
    }

    pub fn captcha_mode(&self) -> bool {
        self.captcha_mode
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Fetch(FetchRequest),
    Query(String),
}

const CAPTCHA_FLAG: &str = "-captcha";

/// Split input into a fetch (`<url> [page-range] [url-pattern] [-captcha]`)
/// or a free-text question.
pub fn parse_command(input: &str) -> Result<Command> {
    let input = input.trim();
    if input.is_empty() {
        return Err(HarvestError::InvalidRequest("empty input".into()));
    }
    if !input.to_ascii_lowercase().starts_with("http") {
        return Ok(Command::Query(input.to_string()));
    }

    let mut tokens = input.split_whitespace();
    let url = tokens.next().unwrap_or_default();
    let mut request = FetchRequest::new(url)?;
    let mut positional = 0;

    for token in tokens {
        if token.eq_ignore_ascii_case(CAPTCHA_FLAG) {
            request = request.with_captcha(true);
            continue;
        }
        if token.starts_with('-') {
            return Err(HarvestError::InvalidRequest(format!("unknown flag {token}")));
        }
        request = match positional {
            0 => request.with_pages(token)?,
            1 => request.with_pattern(token)?,
            _ => {
                return Err(HarvestError::InvalidRequest(format!(
                    "unexpected argument {token:?}"
                )))
            }
        };
        positional += 1;
    }

    Ok(Command::Fetch(request))
}

/// Short display name of a site: `https://www.example.co.uk/x` → `Example`.
pub fn website_name(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let label = host.split('.').next().unwrap_or_default();
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => url.to_string(),
    }
}
