//! Page-range parsing and per-page URL resolution.
//!
//! A range such as `"1-3,5"` expands to `[1, 2, 3, 5]`. Each page number is
//! placed into the URL by a [`PagePattern`], either given explicitly or
//! detected from the URL itself.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::config::PaginationSettings;
use crate::error::{HarvestError, Result};

/// Placeholder substituted with the page number in templates.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Most pages one range may name. Larger ranges are rejected before they
/// are expanded.
pub const MAX_RANGE_PAGES: usize = 1_000;

/// Parse `"1-3,5"` into sorted, de-duplicated page numbers.
pub fn parse_page_range(spec: &str) -> Result<Vec<u32>> {
    let invalid = |why: String| HarvestError::InvalidRequest(format!("page range {spec:?}: {why}"));
    let mut pages = BTreeSet::new();

    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(invalid("empty item".into()));
        }
        let (start, end) = match item.split_once('-') {
            Some((a, b)) => (parse_page(a, &invalid)?, parse_page(b, &invalid)?),
            None => {
                let page = parse_page(item, &invalid)?;
                (page, page)
            }
        };
        if start > end {
            return Err(invalid(format!("inverted range {item}")));
        }
        if (end - start) as usize >= MAX_RANGE_PAGES {
            return Err(invalid(format!("more than {MAX_RANGE_PAGES} pages")));
        }
        pages.extend(start..=end);
        if pages.len() > MAX_RANGE_PAGES {
            return Err(invalid(format!("more than {MAX_RANGE_PAGES} pages")));
        }
    }

    Ok(pages.into_iter().collect())
}

fn parse_page(raw: &str, invalid: &impl Fn(String) -> HarvestError) -> Result<u32> {
    let raw = raw.trim();
    let page: u32 = raw
        .parse()
        .map_err(|_| invalid(format!("{raw:?} is not a page number")))?;
    if page == 0 {
        return Err(invalid("pages start at 1".into()));
    }
    Ok(page)
}

/// Where the page number goes in the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePattern {
    /// Set this query parameter to the page number.
    QueryParam(String),
    /// Replace the path segment at this index.
    PathSegment(usize),
    /// Absolute URL with a `{page}` placeholder.
    UrlTemplate(String),
    /// Path (relative to the host) with a `{page}` placeholder.
    PathTemplate(String),
}

impl PagePattern {
    /// Interpret a user-supplied pattern: `key={page}`, a full URL template,
    /// or a path template.
    pub fn parse_override(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if !pattern.contains(PAGE_PLACEHOLDER) {
            return Err(HarvestError::InvalidRequest(format!(
                "url pattern {pattern:?} has no {PAGE_PLACEHOLDER} placeholder"
            )));
        }
        if pattern.contains("://") {
            return Ok(PagePattern::UrlTemplate(pattern.to_string()));
        }
        let bare = pattern.trim_start_matches(['?', '&']);
        if let Some(key) = bare.strip_suffix(&format!("={PAGE_PLACEHOLDER}")) {
            if !key.is_empty() && !key.contains(['/', '=', '&', '?']) {
                return Ok(PagePattern::QueryParam(key.to_string()));
            }
        }
        Ok(PagePattern::PathTemplate(pattern.to_string()))
    }

    /// A query parameter with a numeric value, else the last purely numeric
    /// path segment.
    ///
    /// In `/2024/archive/3/` the page is `3`, not the year.
    pub fn detect(url: &Url) -> Option<Self> {
        if let Some((key, _)) = url
            .query_pairs()
            .find(|(_, v)| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        {
            return Some(PagePattern::QueryParam(key.into_owned()));
        }
        url.path_segments()?
            .enumerate()
            .filter(|(_, seg)| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
            .last()
            .map(|(idx, _)| PagePattern::PathSegment(idx))
    }

    /// The URL of `page` relative to `base`.
    pub fn page_url(&self, base: &Url, page: u32) -> Result<String> {
        let n = page.to_string();
        let url = match self {
            PagePattern::QueryParam(key) => {
                let mut replaced = false;
                let mut pairs: Vec<(String, String)> = base
                    .query_pairs()
                    .map(|(k, v)| {
                        if k == key.as_str() && !replaced {
                            replaced = true;
                            (k.into_owned(), n.clone())
                        } else {
                            (k.into_owned(), v.into_owned())
                        }
                    })
                    .collect();
                if !replaced {
                    pairs.push((key.clone(), n.clone()));
                }
                let mut url = base.clone();
                url.query_pairs_mut().clear().extend_pairs(pairs);
                url
            }
            PagePattern::PathSegment(idx) => {
                let segments: Vec<String> = base
                    .path_segments()
                    .map(|s| {
                        s.enumerate()
                            .map(|(i, seg)| if i == *idx { n.clone() } else { seg.to_string() })
                            .collect()
                    })
                    .unwrap_or_default();
                let mut url = base.clone();
                url.set_path(&segments.join("/"));
                url
            }
            PagePattern::UrlTemplate(template) => {
                let raw = template.replace(PAGE_PLACEHOLDER, &n);
                Url::parse(&raw).map_err(|e| {
                    HarvestError::InvalidRequest(format!("url pattern yields bad URL {raw}: {e}"))
                })?
            }
            PagePattern::PathTemplate(template) => {
                let raw = template.replace(PAGE_PLACEHOLDER, &n);
                base.join(&raw).map_err(|e| {
                    HarvestError::InvalidRequest(format!("url pattern yields bad path {raw}: {e}"))
                })?
            }
        };
        Ok(url.to_string())
    }
}

/// One URL to fetch, tagged with its page number when paginated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub page: Option<u32>,
    pub url: String,
}

/// Resolved fetch targets in ascending page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub targets: Vec<PageTarget>,
    /// Set when a range was given but no pattern could place it.
    pub warning: Option<String>,
}

/// Expand a URL and optional range into the list of pages to fetch.
pub fn plan_pages(
    url: &str,
    pages: Option<&[u32]>,
    pattern: Option<&PagePattern>,
) -> Result<PagePlan> {
    let single = |warning: Option<String>| PagePlan {
        targets: vec![PageTarget {
            page: None,
            url: url.to_string(),
        }],
        warning,
    };

    let pages = match pages {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(single(None)),
    };

    let base = Url::parse(url)
        .map_err(|e| HarvestError::InvalidRequest(format!("invalid URL {url}: {e}")))?;
    let pattern = match pattern.cloned().or_else(|| PagePattern::detect(&base)) {
        Some(p) => p,
        None => {
            return Ok(single(Some(format!(
                "no pagination pattern found in {url}; fetching it once"
            ))))
        }
    };

    let mut sorted: Vec<u32> = pages.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let targets = sorted
        .into_iter()
        .map(|page| {
            Ok(PageTarget {
                page: Some(page),
                url: pattern.page_url(&base, page)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PagePlan {
        targets,
        warning: None,
    })
}

/// Random pause between consecutive page fetches.
pub fn inter_page_delay(settings: &PaginationSettings) -> Duration {
    let (lo, hi) = (
        settings.min_delay_ms.min(settings.max_delay_ms),
        settings.max_delay_ms.max(settings.min_delay_ms),
    );
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_range() {
        assert_eq!(parse_page_range("1-3,5").unwrap(), vec![1, 2, 3, 5]);
        assert_eq!(parse_page_range("2,2,1").unwrap(), vec![1, 2]);
        assert_eq!(parse_page_range(" 4 ").unwrap(), vec![4]);
        assert_eq!(parse_page_range("3-3").unwrap(), vec![3]);
    }

    #[test]
    fn test_parse_page_range_rejects_bad_input() {
        for bad in ["0", "1,,2", "", "5-2", "a-3", "1-", "-1"] {
            assert!(
                matches!(parse_page_range(bad), Err(HarvestError::InvalidRequest(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_page_range_caps_page_count() {
        assert_eq!(parse_page_range("1-1000").unwrap().len(), MAX_RANGE_PAGES);
        assert_eq!(parse_page_range("1-1000,500-900").unwrap().len(), MAX_RANGE_PAGES);
        for too_many in ["1-4000000000", "1-1001", "1-600,601-1200", "7,2000-2999"] {
            assert!(
                matches!(parse_page_range(too_many), Err(HarvestError::InvalidRequest(_))),
                "{too_many:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_detect_query_param_first() {
        let url = Url::parse("https://shop.example.com/list/7?sort=asc&page=2").unwrap();
        assert_eq!(
            PagePattern::detect(&url),
            Some(PagePattern::QueryParam("page".into()))
        );
    }

    #[test]
    fn test_detect_last_numeric_segment() {
        let url = Url::parse("https://example.com/2024/archive/3/").unwrap();
        assert_eq!(PagePattern::detect(&url), Some(PagePattern::PathSegment(2)));
        let plain = Url::parse("https://example.com/about").unwrap();
        assert_eq!(PagePattern::detect(&plain), None);
    }

    #[test]
    fn test_parse_override_forms() {
        assert_eq!(
            PagePattern::parse_override("p={page}").unwrap(),
            PagePattern::QueryParam("p".into())
        );
        assert_eq!(
            PagePattern::parse_override("?page={page}").unwrap(),
            PagePattern::QueryParam("page".into())
        );
        assert!(matches!(
            PagePattern::parse_override("https://example.com/items/{page}").unwrap(),
            PagePattern::UrlTemplate(_)
        ));
        assert!(matches!(
            PagePattern::parse_override("/catalog/page/{page}").unwrap(),
            PagePattern::PathTemplate(_)
        ));
        assert!(PagePattern::parse_override("/catalog/page").is_err());
    }

    #[test]
    fn test_page_urls_per_pattern() {
        let base = Url::parse("https://example.com/list?page=1&q=rust").unwrap();
        assert_eq!(
            PagePattern::QueryParam("page".into()).page_url(&base, 4).unwrap(),
            "https://example.com/list?page=4&q=rust"
        );
        assert_eq!(
            PagePattern::QueryParam("offset".into()).page_url(&base, 2).unwrap(),
            "https://example.com/list?page=1&q=rust&offset=2"
        );

        let base = Url::parse("https://example.com/blog/page/1").unwrap();
        assert_eq!(
            PagePattern::PathSegment(2).page_url(&base, 9).unwrap(),
            "https://example.com/blog/page/9"
        );
        assert_eq!(
            PagePattern::PathTemplate("/p/{page}/".into())
                .page_url(&base, 3)
                .unwrap(),
            "https://example.com/p/3/"
        );
        assert_eq!(
            PagePattern::UrlTemplate("https://mirror.example.org/?pg={page}".into())
                .page_url(&base, 5)
                .unwrap(),
            "https://mirror.example.org/?pg=5"
        );
    }

    #[test]
    fn test_plan_without_range_is_single_url() {
        let plan = plan_pages("https://example.com/page/3", None, None).unwrap();
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].page, None);
        assert!(plan.warning.is_none());
    }

    #[test]
    fn test_plan_range_without_pattern_warns() {
        let plan = plan_pages("https://example.com/about", Some(&[1, 2]), None).unwrap();
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].url, "https://example.com/about");
        assert!(plan.warning.is_some());
    }

    #[test]
    fn test_plan_is_ascending() {
        let plan = plan_pages("https://example.com/?page=1", Some(&[3, 1, 2]), None).unwrap();
        let pages: Vec<_> = plan.targets.iter().map(|t| t.page.unwrap()).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(plan.targets[2].url, "https://example.com/?page=3");
    }

    #[test]
    fn test_inter_page_delay_bounds() {
        let settings = PaginationSettings {
            min_delay_ms: 10,
            max_delay_ms: 20,
        };
        for _ in 0..50 {
            let d = inter_page_delay(&settings).as_millis();
            assert!((10..=20).contains(&d));
        }
    }
}
