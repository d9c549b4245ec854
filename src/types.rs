//! Core data types shared across the acquisition and assembly pipeline.
//!
//! This module defines:
//! - Chapter identity (`ChapterReference`, `OrdinalSource`)
//! - Per-site extraction rules (`ScraperConfig`)
//! - Chapter selection (`SelectionPolicy`)
//! - Transformed page content (`ImageAsset`, `PixelLayout`)
//! - Task outcomes and run statistics (`ChapterState`, `ChapterResult`, `RunSummary`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a chapter's ordinal was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrdinalSource {
    /// Parsed from the chapter URL with the site's numeric pattern.
    Parsed,
    /// The URL carried no usable number; the 1-based discovery position was substituted.
    Positional,
}

/// One discovered chapter. Immutable once created by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterReference {
    pub source_url: String,
    /// Chapter number; fractional values are sub-chapters (e.g. `10.5`).
    pub ordinal: f64,
    pub ordinal_source: OrdinalSource,
    /// Display form of the ordinal, also used as the output file stem.
    pub title: String,
}

impl ChapterReference {
    pub fn new(source_url: impl Into<String>, ordinal: f64, ordinal_source: OrdinalSource) -> Self {
        Self {
            source_url: source_url.into(),
            ordinal,
            ordinal_source,
            title: format_ordinal(ordinal),
        }
    }
}

/// Renders an ordinal without fractional noise: `10.0` becomes `"10"`, `10.5` stays `"10.5"`.
pub fn format_ordinal(ordinal: f64) -> String {
    if ordinal.fract() == 0.0 && ordinal.is_finite() {
        format!("{:.0}", ordinal)
    } else {
        ordinal.to_string()
    }
}

/// Data-driven extraction rules for one hosting site.
///
/// Adding a site is a pure data change: a new entry in the site table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub hostname: String,
    /// CSS selector matching the chapter anchors on the listing page.
    #[serde(rename = "list_chapter_url")]
    pub chapter_list_selector: String,
    /// Attribute holding the chapter link (usually `href`).
    #[serde(rename = "attr_chapter")]
    pub chapter_link_attr: String,
    /// CSS selector matching image elements (or the script block for `pattern`).
    #[serde(rename = "list_image_url")]
    pub image_list_selector: String,
    /// Attribute holding the image link (usually `src`).
    #[serde(rename = "attr_image", default)]
    pub image_attr: String,
    /// Regex with one capture group matching a script-embedded, comma-separated image array.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Regex extracting the ordinal from a chapter URL. Group 1 is the whole part, an
    /// optional group 2 the sub-chapter fraction.
    #[serde(default)]
    pub chapter_pattern: Option<String>,
}

/// Which discovered chapters to process. Positions are 1-based, in ascending chapter order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionPolicy {
    #[default]
    All,
    Single(usize),
    /// Inclusive on both ends.
    Range { min: usize, max: usize },
}

/// Pixel layout of the normalized JPEG stream handed to the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Gray,
}

impl PixelLayout {
    /// PDF color space name for an image XObject with this layout.
    pub fn color_space(&self) -> &'static str {
        match self {
            PixelLayout::Rgb => "DeviceRGB",
            PixelLayout::Gray => "DeviceGray",
        }
    }
}

/// A fetched, validated and normalized page image. Dropped once appended to a document.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    /// JPEG bytes, the assembler's native input.
    pub bytes: Vec<u8>,
    pub source_url: String,
    /// Format the image was served in, before normalization.
    pub decoded_format: image::ImageFormat,
    pub layout: PixelLayout,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Lifecycle of a single chapter task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterState {
    Pending,
    Extracting,
    Assembling,
    Done,
    Failed,
}

/// Successful outcome of a chapter task. Failures travel as [`crate::error::Error`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterResult {
    /// A document was written.
    Written { output_path: PathBuf, image_count: usize },
    /// The output already existed; no network work was done.
    AlreadyPresent { output_path: PathBuf },
    /// Merge mode: the image list was handed to the merge engine.
    Deferred { ordinal: f64, image_count: usize },
}

/// Statistics for one invocation.
///
/// `generated_files` is in completion order, not chapter order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub chapters_requested: usize,
    pub chapters_skipped: usize,
    pub generated_files: Vec<PathBuf>,
    pub total_images_processed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Folds another series' summary into this one.
    pub fn absorb(&mut self, other: RunSummary) {
        self.chapters_requested += other.chapters_requested;
        self.chapters_skipped += other.chapters_skipped;
        self.generated_files.extend(other.generated_files);
        self.total_images_processed += other.total_images_processed;
        self.elapsed = self.elapsed.max(other.elapsed);
    }

    pub fn log(&self) {
        log::info!(
            "[SUMMARY] Processed {} chapters in {:?}",
            self.chapters_requested,
            self.elapsed
        );
        log::info!(
            "[SUMMARY] Generated {} PDF files ({} already present)",
            self.generated_files.len(),
            self.chapters_skipped
        );
        log::info!(
            "[SUMMARY] Processed {} images in total",
            self.total_images_processed
        );
    }
}
