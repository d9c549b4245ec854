//! Chapter link discovery.
//!
//! The collector fetches a series listing page, extracts chapter anchors with the
//! site's selector, resolves them against the page URL and returns them in
//! ascending chapter order. Listing pages are newest-first, so the extracted
//! sequence is reversed before the selection policy is applied.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::client::{PageFetcher, check_block_status};
use crate::error::{Error, Result};
use crate::site::{chapter_regex, parse_ordinal};
use crate::types::{ChapterReference, OrdinalSource, ScraperConfig, SelectionPolicy};

/// Discovers the chapters of one series.
pub struct Collector<'a> {
    fetcher: &'a dyn PageFetcher,
    site: &'a ScraperConfig,
    chapter_regex: Regex,
}

impl<'a> Collector<'a> {
    /// Creates a collector for `site`, compiling its chapter pattern.
    pub fn new(fetcher: &'a dyn PageFetcher, site: &'a ScraperConfig) -> Result<Self> {
        if site.chapter_list_selector.is_empty() || site.chapter_link_attr.is_empty() {
            return Err(Error::Other(format!(
                "site '{}' has no chapter selector or link attribute",
                site.hostname
            )));
        }
        Ok(Self {
            fetcher,
            site,
            chapter_regex: chapter_regex(site)?,
        })
    }

    /// Fetches the listing page and returns the selected chapters in ascending order.
    ///
    /// A non-success status is a soft skip: it is logged and yields no chapters.
    pub async fn collect_chapters(
        &self,
        series_url: &str,
        selection: SelectionPolicy,
    ) -> Result<Vec<ChapterReference>> {
        log::info!("Fetching chapter links from: {}", series_url);
        let page = self.fetcher.fetch(series_url).await?;

        if !page.is_success() {
            check_block_status(series_url, &page);
            log::warn!(
                "Skipping listing {} with status code {}",
                series_url,
                page.status
            );
            return Ok(Vec::new());
        }

        let mut links = extract_links(
            &page.text(),
            series_url,
            &self.site.chapter_list_selector,
            &self.site.chapter_link_attr,
        )?;
        log::debug!("Found {} chapter links", links.len());

        links.reverse();
        let links = apply_selection(links, selection)?;
        log::info!("Returning {} chapters to process", links.len());

        Ok(self.to_references(links))
    }

    /// Builds chapter references, substituting the 1-based position when the
    /// URL carries no parsable number.
    pub fn to_references(&self, links: Vec<String>) -> Vec<ChapterReference> {
        links
            .into_iter()
            .enumerate()
            .map(|(index, link)| match parse_ordinal(&link, &self.chapter_regex) {
                Some(ordinal) => ChapterReference::new(link, ordinal, OrdinalSource::Parsed),
                None => {
                    let position = (index + 1) as f64;
                    log::warn!(
                        "Chapter title is not a number, using position {} instead: {}",
                        position,
                        link
                    );
                    ChapterReference::new(link, position, OrdinalSource::Positional)
                }
            })
            .collect()
    }
}

/// Parses `html`, selects `selector` and returns the resolved `attr` values in DOM order.
pub fn extract_links(
    html: &str,
    base_url: &str,
    selector: &str,
    attr: &str,
) -> Result<Vec<String>> {
    let selector =
        Selector::parse(selector).map_err(|_| Error::Selector(selector.to_string()))?;
    let document = Html::parse_document(html);

    let links = document
        .select(&selector)
        .filter_map(|element| element.value().attr(attr))
        .filter_map(|href| match resolve_link(href, base_url) {
            Ok(link) => Some(link),
            Err(e) => {
                log::error!("Failed to complete URL '{}': {}", href, e);
                None
            }
        })
        .collect();

    Ok(links)
}

/// Resolves an absolute or host-relative link against the page it was found on.
pub fn resolve_link(href: &str, base_url: &str) -> Result<String> {
    let href = href.trim();
    if href.is_empty() {
        return Err(Error::Other("URL cannot be empty".to_string()));
    }
    if let Ok(absolute) = Url::parse(href) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(base_url)?;
    Ok(base.join(href)?.to_string())
}

/// Narrows an ascending chapter list to the requested positions.
///
/// Out-of-range requests fail instead of truncating: they mean the selection
/// does not match what the site actually lists.
pub fn apply_selection<T>(mut items: Vec<T>, selection: SelectionPolicy) -> Result<Vec<T>> {
    let total = items.len();
    match selection {
        SelectionPolicy::All => Ok(items),
        SelectionPolicy::Single(position) => {
            if position == 0 || position > total {
                return Err(Error::InvalidSelection(format!(
                    "single chapter {} is outside 1..={}",
                    position, total
                )));
            }
            log::info!("Selecting single chapter {}", position);
            Ok(vec![items.swap_remove(position - 1)])
        }
        SelectionPolicy::Range { min, max } => {
            if min == 0 || min > max || max > total {
                return Err(Error::InvalidSelection(format!(
                    "range {}-{} is outside 1..={}",
                    min, max, total
                )));
            }
            log::info!("Filtering chapters range {}-{}", min, max);
            Ok(items.drain(min - 1..max).collect())
        }
    }
}
