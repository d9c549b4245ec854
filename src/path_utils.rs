//! Output layout helpers.
//!
//! Every series is written to `<output_root>/<slug>/`, where the slug is the last
//! path segment of the series URL, and every document to `<title>.pdf` inside it.

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};
use url::Url;

/// Extension of every produced document.
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
///
/// # Arguments
///
/// * `filename` - The filename to sanitize
///
/// # Returns
///
/// * `String` - The sanitized filename
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Derives the directory name for a series from its URL.
///
/// Uses the last non-empty path segment (`https://host/manga/one-piece/` gives
/// `one-piece`), falling back to the hostname for URLs without a path.
pub fn series_slug(series_url: &str) -> Result<String> {
    let parsed = Url::parse(series_url)?;

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string());

    match segment.or_else(|| parsed.host_str().map(|h| h.to_string())) {
        Some(slug) if !slug.is_empty() => Ok(sanitize_filename(&slug)),
        _ => Err(Error::InvalidTarget(format!(
            "cannot derive an output directory from '{}'",
            series_url
        ))),
    }
}

/// Builds `<dir>/<title>.pdf`.
pub fn document_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename(title), DOCUMENT_EXTENSION))
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
