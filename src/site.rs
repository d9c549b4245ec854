//! Site table lookup and URL-level heuristics.
//!
//! A [`SiteRegistry`] maps hostnames to [`ScraperConfig`] entries. Lookup is
//! case-insensitive and the first matching entry wins when the table lists a
//! hostname more than once.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::types::ScraperConfig;

lazy_static! {
    /// Default ordinal pattern: `chapter-12/` gives 12, `chapter-12-5/` gives 12.5.
    pub static ref DEFAULT_CHAPTER_REGEX: Regex =
        Regex::new(r"chapter-(\d+)(?:-(\d+))?(?:/|$|\?|#)").unwrap();
}

/// Extensions accepted on image URLs. Anything else with an extension is skipped before fetch.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

/// In-memory site table.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<ScraperConfig>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<ScraperConfig>) -> Self {
        Self { sites }
    }

    /// Parses a JSON array of site entries.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let sites: Vec<ScraperConfig> = serde_json::from_str(json)?;
        Ok(Self::new(sites))
    }

    /// Reads a JSON site table from disk.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let registry = Self::from_json_str(&raw)?;
        log::info!(
            "Loaded {} site configurations from {}",
            registry.sites.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn sites(&self) -> &[ScraperConfig] {
        &self.sites
    }

    /// Returns the first entry whose hostname equals `hostname`, ignoring case.
    pub fn resolve(&self, hostname: &str) -> Option<&ScraperConfig> {
        self.sites
            .iter()
            .find(|site| site.hostname.eq_ignore_ascii_case(hostname))
    }

    /// Resolves the configuration for the host of `series_url`.
    pub fn resolve_url(&self, series_url: &str) -> Result<&ScraperConfig> {
        let parsed = Url::parse(series_url)?;
        let host = parsed.host_str().unwrap_or_default();
        match self.resolve(host) {
            Some(site) => {
                log::info!("Found configuration for domain: {}", host);
                Ok(site)
            }
            None => {
                log::warn!("Configuration not found for domain: '{}'", host);
                Err(Error::UnsupportedSite(host.to_string()))
            }
        }
    }
}

/// Extracts the chapter number from a chapter URL.
///
/// With a two-group pattern the groups are joined as `whole.fraction`; with a
/// single group the capture is parsed as-is, so patterns may also capture `10.5`.
pub fn parse_ordinal(chapter_url: &str, pattern: &Regex) -> Option<f64> {
    let caps = pattern.captures(chapter_url)?;
    let whole = caps.get(1).or_else(|| caps.get(0))?.as_str();

    match caps.get(2) {
        Some(fraction) => format!("{}.{}", whole, fraction.as_str()).parse().ok(),
        None => whole.parse().ok(),
    }
}

/// Compiles the chapter pattern of `site`, or returns the default one.
pub fn chapter_regex(site: &ScraperConfig) -> Result<Regex> {
    match site.chapter_pattern.as_deref() {
        Some(pattern) if !pattern.is_empty() => Ok(Regex::new(pattern)?),
        _ => Ok(DEFAULT_CHAPTER_REGEX.clone()),
    }
}

/// Lower-cased extension of the URL's last path segment, if any.
pub fn url_extension(image_url: &str) -> Option<String> {
    let path = match Url::parse(image_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => image_url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// True unless the URL names a file whose extension is not an image type.
///
/// Extension-less URLs pass; their format is decided from the fetched bytes.
pub fn has_acceptable_extension(image_url: &str) -> bool {
    match url_extension(image_url) {
        Some(ext) => IMAGE_EXTENSIONS.contains(&ext.as_str()),
        None => true,
    }
}
