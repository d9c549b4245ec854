//! Comdown - Comic Chapter to PDF Downloader
//!
//! This crate scrapes chapter listings from configured comic hosting sites, fetches
//! every chapter's page images, normalizes them and writes one PDF per chapter, or
//! one PDF per batch of consecutive chapters when merging is enabled.
//!
//! # Getting Started
//!
//! Describe the hosting sites in a [`SiteRegistry`], configure the run with
//! [`ComdownConfig::builder()`], then hand the series URLs to [`Comdown::run`].
//!
//! ```rust,no_run
//! use comdown::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> comdown::error::Result<()> {
//!     let sites = SiteRegistry::from_json_str(r#"[{
//!         "hostname": "comics.example",
//!         "list_chapter_url": "ul.chapters a",
//!         "attr_chapter": "href",
//!         "list_image_url": "div.reader img",
//!         "attr_image": "src"
//!     }]"#)?;
//!
//!     let config = ComdownConfig::builder()
//!         .selection(SelectionPolicy::Range { min: 1, max: 10 })
//!         .merge_size(5usize)
//!         .build()?;
//!
//!     let summary = Comdown::new(config, sites)?
//!         .run(&["https://comics.example/series/some-title/".to_string()])
//!         .await?;
//!     println!("Wrote {} documents", summary.generated_files.len());
//!     Ok(())
//! }
//! ```
//!
//! Chapters whose document already exists are skipped without any network traffic,
//! so re-running the same command only fills in what is missing.

pub mod client;
pub mod collector;
pub mod comdown;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod merge;
pub mod path_utils;
pub mod scheduler;
pub mod site;
pub mod transform;
pub mod types;

pub use comdown::{Comdown, ComdownConfig, ComdownConfigBuilder, SeriesReport};
pub use site::SiteRegistry;

pub use types::{
    ChapterReference, ChapterResult, ChapterState, ImageAsset, OrdinalSource, PixelLayout,
    RunSummary, ScraperConfig, SelectionPolicy,
};

/// Prelude module for convenient imports.
///
/// Re-exports the types needed to configure and drive a run with a single
/// `use comdown::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        ChapterReference, ChapterResult, Comdown, ComdownConfig, ComdownConfigBuilder,
        ImageAsset, OrdinalSource, PixelLayout, RunSummary, ScraperConfig, SelectionPolicy,
        SiteRegistry, error, types,
    };
    pub use crate::client::{FetchedPage, HttpClient, HttpOptions, PageFetcher};
    pub use crate::generator::Assembler;
    pub use crate::generator::pdf::PdfAssembler;
    pub use crate::generator::pool::AssemblerPool;
    pub use crate::scheduler::FailurePolicy;
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
