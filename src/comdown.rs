use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::fs;

use crate::client::{HttpClient, HttpOptions, PageFetcher};
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::extractor::ImageExtractor;
use crate::generator::pdf::PdfAssembler;
use crate::generator::pool::AssemblerPool;
use crate::merge::{MergeEngine, plan_batches};
use crate::path_utils::{path_to_string_lossy, series_slug};
use crate::scheduler::{
    ChapterScheduler, ExistenceCache, FailurePolicy, SummaryCollector, TaskResources,
};
use crate::site::SiteRegistry;
use crate::transform::ImagePipeline;
use crate::types::{RunSummary, SelectionPolicy};

pub const DEFAULT_OUTPUT_ROOT: &str = "comics";
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Run configuration, built declaratively with [`ComdownConfig::builder()`].
///
/// ```rust,no_run
/// # use comdown::prelude::*;
/// let config = ComdownConfig::builder()
///     .selection(SelectionPolicy::Range { min: 3, max: 5 })
///     .max_concurrent(8usize)
///     .merge_size(5usize)
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ComdownConfig {
    /// Root under which each series gets its own directory.
    #[builder(default = "PathBuf::from(DEFAULT_OUTPUT_ROOT)")]
    pub output_root: PathBuf,

    /// Which chapters of each series to process.
    #[builder(default)]
    pub selection: SelectionPolicy,

    /// Upper bound on chapter (and batch) tasks running at once within a series.
    #[builder(default = "DEFAULT_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Chapters per merged document; `0` writes one document per chapter.
    #[builder(default)]
    pub merge_size: usize,

    /// Upscale, sharpen and boost contrast of every image.
    #[builder(default)]
    pub enhance: bool,

    /// Keep processing a series after a chapter fails and report every failure.
    #[builder(default)]
    pub continue_on_error: bool,

    /// Upper bound on series processed at once in a multi-target run.
    #[builder(default = "num_cpus::get().min(4)")]
    pub series_concurrency: usize,

    #[builder(default)]
    pub http: HttpOptions,
}

impl ComdownConfig {
    pub fn builder() -> ComdownConfigBuilder {
        ComdownConfigBuilder::default()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::from_continue_on_error(self.continue_on_error)
    }
}

impl ComdownConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.max_concurrent == Some(0) {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.series_concurrency == Some(0) {
            return Err("series_concurrency must be at least 1".to_string());
        }
        match self.selection {
            Some(SelectionPolicy::Single(0)) => {
                Err("single chapter selection is 1-based".to_string())
            }
            Some(SelectionPolicy::Range { min, max }) if min == 0 || min > max => Err(format!(
                "invalid chapter range {}..{}: expected 1 <= min <= max",
                min, max
            )),
            _ => Ok(()),
        }
    }
}

/// Outcome of one series: its summary is kept even when it failed.
#[derive(Debug)]
pub struct SeriesReport {
    pub series_url: String,
    pub summary: RunSummary,
    pub error: Option<Error>,
}

/// Downloads series and writes their chapters as PDF documents.
pub struct Comdown {
    config: ComdownConfig,
    sites: SiteRegistry,
    fetcher: Arc<dyn PageFetcher>,
    pool: Arc<AssemblerPool<PdfAssembler>>,
}

impl Comdown {
    /// Creates a downloader that talks HTTP with the configured transport options.
    pub fn new(config: ComdownConfig, sites: SiteRegistry) -> Result<Self> {
        let client = HttpClient::new(config.http.clone())?;
        Ok(Self::with_fetcher(config, sites, Arc::new(client)))
    }

    /// Creates a downloader on top of any [`PageFetcher`].
    pub fn with_fetcher(
        config: ComdownConfig,
        sites: SiteRegistry,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config,
            sites,
            fetcher,
            pool: AssemblerPool::new(),
        }
    }

    pub fn config(&self) -> &ComdownConfig {
        &self.config
    }

    /// Assemblers shared by every series of this downloader.
    pub fn pool(&self) -> &Arc<AssemblerPool<PdfAssembler>> {
        &self.pool
    }

    /// Processes every target series and returns the combined summary.
    ///
    /// A single target fails with its own first error. Several targets run
    /// independently, and their failures come back together as [`Error::Multiple`].
    pub async fn run(&self, targets: &[String]) -> Result<RunSummary> {
        let cache = Arc::new(ExistenceCache::new());

        match targets {
            [] => Err(Error::Other("no series URL given".to_string())),
            [series_url] => {
                let report = self.run_series(series_url, &cache).await;
                match report.error {
                    Some(e) => Err(e),
                    None => Ok(report.summary),
                }
            }
            _ => {
                log::info!(
                    "Processing {} series, {} at a time",
                    targets.len(),
                    self.config.series_concurrency
                );
                let cache = &cache;
                let reports: Vec<SeriesReport> = stream::iter(targets)
                    .map(|series_url| async move { self.run_series(series_url, cache).await })
                    .buffer_unordered(self.config.series_concurrency.max(1))
                    .collect()
                    .await;

                let mut combined = RunSummary::default();
                let mut failures = Vec::new();
                for report in reports {
                    combined.absorb(report.summary);
                    if let Some(e) = report.error {
                        log::error!("Series {} failed: {}", report.series_url, e);
                        failures.push(e.for_url(report.series_url));
                    }
                }
                combined.log();

                if failures.is_empty() {
                    Ok(combined)
                } else {
                    Err(Error::Multiple(failures))
                }
            }
        }
    }

    /// Runs one series end to end and logs its summary, whatever the outcome.
    pub async fn run_series(&self, series_url: &str, cache: &Arc<ExistenceCache>) -> SeriesReport {
        let started = Instant::now();
        let summary = Arc::new(SummaryCollector::new());
        let mut requested = 0;

        let outcome = self
            .process_series(series_url, cache, &summary, &mut requested)
            .await;
        if let Err(e) = &outcome {
            log::error!("Error processing {}: {}", series_url, e);
        }

        let summary = summary.finish(requested, started.elapsed());
        summary.log();
        SeriesReport {
            series_url: series_url.to_string(),
            summary,
            error: outcome.err(),
        }
    }

    async fn process_series(
        &self,
        series_url: &str,
        cache: &Arc<ExistenceCache>,
        summary: &Arc<SummaryCollector>,
        requested: &mut usize,
    ) -> Result<()> {
        let site = self.sites.resolve_url(series_url)?;
        let output_dir = self.config.output_root.join(series_slug(series_url)?);
        fs::create_dir_all(&output_dir).await?;
        log::info!("Writing documents to {}", path_to_string_lossy(&output_dir));

        let chapters = Collector::new(self.fetcher.as_ref(), site)?
            .collect_chapters(series_url, self.config.selection)
            .await?;
        *requested = chapters.len();
        if chapters.is_empty() {
            log::warn!("No chapters to process for {}", series_url);
            return Ok(());
        }

        let policy = self.config.failure_policy();
        let resources = TaskResources {
            pipeline: ImagePipeline::new(Arc::clone(&self.fetcher), self.config.enhance),
            pool: Arc::clone(&self.pool),
            cache: Arc::clone(cache),
            summary: Arc::clone(summary),
            max_concurrent: self.config.max_concurrent,
            policy,
        };
        let merging = self.config.merge_size > 0;

        let extractor = ImageExtractor::new(Arc::clone(&self.fetcher), site)?;
        let report = ChapterScheduler::new(extractor, resources.clone(), merging)
            .run(chapters, &output_dir)
            .await?;
        let (written, present, deferred) = report.tally();
        log::info!(
            "Chapter stage finished: {} written, {} already present, {} deferred, {} failed",
            written,
            present,
            deferred,
            report.failures.len()
        );
        let mut failures = report.failures;

        if merging && (failures.is_empty() || policy == FailurePolicy::CollectAll) {
            let batches = plan_batches(report.merge_entries, self.config.merge_size);
            let outcome = MergeEngine::new(resources).run(batches, &output_dir).await?;
            failures.extend(outcome.failures);
        }

        combine_failures(failures, policy)
    }
}

/// Fail-fast reports the first failure; collect-all reports every one.
fn combine_failures(mut failures: Vec<Error>, policy: FailurePolicy) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        log::error!("{}", failure);
    }
    match policy {
        FailurePolicy::FailFast => Err(failures.remove(0)),
        FailurePolicy::CollectAll if failures.len() == 1 => Err(failures.remove(0)),
        FailurePolicy::CollectAll => Err(Error::Multiple(failures)),
    }
}
