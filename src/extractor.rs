//! Per-chapter image link extraction.
//!
//! Two strategies, chosen by the site entry:
//! - attribute: every element matching the image selector contributes its image attribute;
//! - pattern: the text of every matching element (typically a `<script>` block) is searched
//!   with a regex whose first group captures a comma-separated image array.

use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::client::{PageFetcher, check_block_status};
use crate::error::{Error, Result};
use crate::types::ScraperConfig;

/// How image links are pulled out of a chapter page.
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    Attribute(String),
    Pattern(Regex),
}

impl ExtractionStrategy {
    /// Picks the strategy for `site`. A configured pattern takes precedence.
    pub fn for_site(site: &ScraperConfig) -> Result<Self> {
        match site.pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => {
                Ok(ExtractionStrategy::Pattern(Regex::new(pattern)?))
            }
            _ if !site.image_attr.is_empty() => {
                Ok(ExtractionStrategy::Attribute(site.image_attr.clone()))
            }
            _ => Err(Error::Other(format!(
                "site '{}' has neither an image attribute nor a pattern",
                site.hostname
            ))),
        }
    }
}

/// Extracts the ordered image links of chapter pages for one site.
pub struct ImageExtractor {
    fetcher: Arc<dyn PageFetcher>,
    selector: Selector,
    strategy: ExtractionStrategy,
}

impl ImageExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, site: &ScraperConfig) -> Result<Self> {
        let selector = Selector::parse(&site.image_list_selector)
            .map_err(|_| Error::Selector(site.image_list_selector.clone()))?;
        Ok(Self {
            fetcher,
            selector,
            strategy: ExtractionStrategy::for_site(site)?,
        })
    }

    /// Fetches `chapter_url` and returns its image links in page order.
    ///
    /// An empty list is not an error here; callers report it as a chapter failure.
    /// A non-success status is logged and also yields an empty list.
    pub async fn extract(&self, chapter_url: &str) -> Result<Vec<String>> {
        let page = self.fetcher.fetch(chapter_url).await?;

        if !page.is_success() {
            check_block_status(chapter_url, &page);
            log::warn!(
                "Skipping URL {} with status code {}",
                chapter_url,
                page.status
            );
            return Ok(Vec::new());
        }

        let links = self.extract_from_html(&page.text(), chapter_url);
        log::info!("Found {} images on page {}", links.len(), chapter_url);
        Ok(links)
    }

    /// Runs the configured strategy against an already-fetched page.
    pub fn extract_from_html(&self, html: &str, page_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut links = Vec::new();

        for element in document.select(&self.selector) {
            match &self.strategy {
                ExtractionStrategy::Attribute(attr) => {
                    if let Some(src) = element.value().attr(attr) {
                        match resolve_image_link(src, page_url) {
                            Some(link) => links.push(link),
                            None => log::warn!("Ignoring unresolvable image link '{}'", src),
                        }
                    }
                }
                ExtractionStrategy::Pattern(pattern) => {
                    let text: String = element.text().collect();
                    links.extend(match_pattern_links(&text, pattern));
                }
            }
        }

        links
    }
}

fn resolve_image_link(src: &str, page_url: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    match Url::parse(src) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(page_url).ok()?.join(src).ok().map(|u| u.to_string()),
    }
}

/// Splits the first capture group of `pattern` in `text` into image links.
///
/// Entries are unquoted and JSON-unescaped (`\/` becomes `/`); anything that is
/// not an absolute URL is dropped.
pub fn match_pattern_links(text: &str, pattern: &Regex) -> Vec<String> {
    let Some(array) = pattern.captures(text).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };

    array
        .as_str()
        .split(',')
        .map(|entry| entry.trim().trim_matches(|c| c == '"' || c == '\'' || c == ' '))
        .map(|entry| entry.replace("\\/", "/"))
        .filter(|entry| {
            let valid = Url::parse(entry).is_ok_and(|u| u.has_host());
            if !valid && !entry.is_empty() {
                log::warn!("Rejecting non-absolute image link '{}'", entry);
            }
            valid
        })
        .collect()
}
