//! Bounded-concurrency chapter processing.
//!
//! Each chapter runs as its own task: existence check, image extraction, then
//! either document assembly or (in merge mode) deferral of its image list to
//! the merge engine. At most `max_concurrent` tasks run at a time; a task only
//! starts once a permit is held, so pending chapters never touch the network.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::extractor::ImageExtractor;
use crate::generator::Assembler;
use crate::generator::pool::AssemblerPool;
use crate::merge::MergeEntry;
use crate::path_utils::{document_path, path_to_string_lossy};
use crate::transform::ImagePipeline;
use crate::types::{ChapterReference, ChapterResult, ChapterState, RunSummary};

/// What happens to the remaining tasks after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Cancel pending tasks; the first failure is the run's error.
    #[default]
    FailFast,
    /// Keep going and report every failure.
    CollectAll,
}

impl FailurePolicy {
    pub fn from_continue_on_error(continue_on_error: bool) -> Self {
        if continue_on_error {
            FailurePolicy::CollectAll
        } else {
            FailurePolicy::FailFast
        }
    }
}

/// Memoized output-file existence checks.
///
/// Each distinct path is stat'ed at most once per run, even under concurrent
/// lookups: the filesystem check happens while the map lock is held.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    entries: Mutex<HashMap<PathBuf, bool>>,
    stats: AtomicUsize,
}

impl ExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, path: &Path) -> bool {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&known) = entries.get(path) {
            return known;
        }
        self.stats.fetch_add(1, Ordering::Relaxed);
        let present = std::fs::metadata(path).is_ok();
        entries.insert(path.to_path_buf(), present);
        present
    }

    /// Number of filesystem checks actually performed.
    pub fn stat_count(&self) -> usize {
        self.stats.load(Ordering::Relaxed)
    }
}

/// Thread-safe accumulator behind a run's [`RunSummary`].
#[derive(Debug, Default)]
pub struct SummaryCollector {
    inner: Mutex<RunSummary>,
}

impl SummaryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_written(&self, path: PathBuf, images: usize) {
        let mut summary = self.lock();
        summary.generated_files.push(path);
        summary.total_images_processed += images;
    }

    pub fn record_skipped(&self) {
        self.lock().chapters_skipped += 1;
    }

    /// Snapshot of the counters with the request count and elapsed time filled in.
    pub fn finish(&self, chapters_requested: usize, elapsed: Duration) -> RunSummary {
        let mut summary = self.lock().clone();
        summary.chapters_requested = chapters_requested;
        summary.elapsed = elapsed;
        summary
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunSummary> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// State shared by the chapter scheduler and the merge engine for one series.
pub struct TaskResources<A: Assembler + 'static> {
    pub pipeline: ImagePipeline,
    pub pool: Arc<AssemblerPool<A>>,
    pub cache: Arc<ExistenceCache>,
    pub summary: Arc<SummaryCollector>,
    pub max_concurrent: usize,
    pub policy: FailurePolicy,
}

impl<A: Assembler + 'static> Clone for TaskResources<A> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            pool: Arc::clone(&self.pool),
            cache: Arc::clone(&self.cache),
            summary: Arc::clone(&self.summary),
            max_concurrent: self.max_concurrent,
            policy: self.policy,
        }
    }
}

impl<A: Assembler + 'static> TaskResources<A> {
    /// Fetches every image of `image_urls` into one pooled assembler and writes
    /// it to `output_path`.
    ///
    /// Individual image failures are logged and skipped. The assembler goes back to
    /// the pool on every path out of this function.
    ///
    /// # Returns
    /// The number of pages written, or `Err(Error::NoImages)` if none survived.
    pub async fn assemble(
        &self,
        label: &str,
        image_urls: &[String],
        output_path: &Path,
    ) -> Result<usize> {
        let mut assembler = self.pool.acquire();
        let total = image_urls.len();

        for (index, url) in image_urls.iter().enumerate() {
            log::debug!("Processing image {}/{} of {}: {}", index + 1, total, label, url);

            let asset = match self.pipeline.process(url).await {
                Ok(asset) => asset,
                Err(e) => {
                    log::warn!("Skipping image {}: {}", url, e);
                    continue;
                }
            };
            if let Err(e) = assembler.append_image(&asset) {
                log::error!("Failed to add image {} to document: {}", url, e);
            }
        }

        let pages = assembler.page_count();
        if pages == 0 {
            return Err(Error::NoImages(label.to_string()));
        }

        assembler.persist(output_path).await?;
        log::info!(
            "Generated {} ({} pages)",
            path_to_string_lossy(output_path),
            pages
        );
        Ok(pages)
    }
}

/// Results of a bounded run, in completion order.
#[derive(Debug)]
pub struct BoundedOutcome<R> {
    pub completed: Vec<R>,
    pub failures: Vec<Error>,
}

/// Runs `task` over `items` with at most `max_concurrent` in flight.
///
/// A permit is acquired before a task is spawned. Under [`FailurePolicy::FailFast`]
/// the first failure cancels the shared token, and items not yet started are
/// dropped without running. Cancellation errors are not reported as failures.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrent: usize,
    policy: FailurePolicy,
    task: F,
) -> Result<BoundedOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let token = CancellationToken::new();
    let task = Arc::new(task);
    let completed = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for item in items {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        if token.is_cancelled() {
            log::warn!("Run cancelled; not starting remaining tasks");
            break;
        }

        let token = token.clone();
        let task = Arc::clone(&task);
        let completed = Arc::clone(&completed);
        let failures = Arc::clone(&failures);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            // The token may have fired between scheduling and the task being polled.
            let outcome = if token.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                task(item).await
            };
            match outcome {
                Ok(result) => completed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(result),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if policy == FailurePolicy::FailFast {
                        token.cancel();
                    }
                    failures
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(e);
                }
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(Error::Join(e));
        }
    }

    let completed = std::mem::take(&mut *completed.lock().unwrap_or_else(|p| p.into_inner()));
    let failures = std::mem::take(&mut *failures.lock().unwrap_or_else(|p| p.into_inner()));
    Ok(BoundedOutcome { completed, failures })
}

/// Everything the chapter stage produced for one series.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    pub results: Vec<ChapterResult>,
    pub failures: Vec<Error>,
    /// Merge mode only: per-chapter image lists, in completion order.
    pub merge_entries: Vec<MergeEntry>,
}

impl ScheduleReport {
    /// Chapters that were (written, already present, deferred to merging).
    pub fn tally(&self) -> (usize, usize, usize) {
        self.results
            .iter()
            .fold((0, 0, 0), |(written, present, deferred), result| match result {
                ChapterResult::Written { .. } => (written + 1, present, deferred),
                ChapterResult::AlreadyPresent { .. } => (written, present + 1, deferred),
                ChapterResult::Deferred { .. } => (written, present, deferred + 1),
            })
    }
}

/// Drives the per-chapter state machine over a selected chapter list.
pub struct ChapterScheduler<A: Assembler + 'static> {
    extractor: Arc<ImageExtractor>,
    resources: TaskResources<A>,
    merge_mode: bool,
}

impl<A: Assembler + 'static> ChapterScheduler<A> {
    pub fn new(extractor: ImageExtractor, resources: TaskResources<A>, merge_mode: bool) -> Self {
        Self {
            extractor: Arc::new(extractor),
            resources,
            merge_mode,
        }
    }

    /// Processes `chapters`, writing documents under `output_dir`.
    pub async fn run(
        &self,
        chapters: Vec<ChapterReference>,
        output_dir: &Path,
    ) -> Result<ScheduleReport> {
        log::info!(
            "Scheduling {} chapters with concurrency {}",
            chapters.len(),
            self.resources.max_concurrent
        );

        let merge_entries = Arc::new(Mutex::new(Vec::new()));
        let extractor = Arc::clone(&self.extractor);
        let resources = self.resources.clone();
        let output_dir = output_dir.to_path_buf();
        let merge_mode = self.merge_mode;
        let entries = Arc::clone(&merge_entries);

        let outcome = run_bounded(
            chapters,
            self.resources.max_concurrent,
            self.resources.policy,
            move |chapter: ChapterReference| {
                let extractor = Arc::clone(&extractor);
                let resources = resources.clone();
                let output_dir = output_dir.clone();
                let entries = Arc::clone(&entries);
                async move {
                    let url = chapter.source_url.clone();
                    process_chapter(
                        chapter,
                        &extractor,
                        &resources,
                        &output_dir,
                        merge_mode,
                        &entries,
                    )
                    .await
                    .map_err(|e| e.for_url(&url))
                }
            },
        )
        .await?;

        let merge_entries = std::mem::take(
            &mut *merge_entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        Ok(ScheduleReport {
            results: outcome.completed,
            failures: outcome.failures,
            merge_entries,
        })
    }
}

fn transition(url: &str, state: ChapterState) {
    log::debug!("Chapter {} -> {:?}", url, state);
}

async fn process_chapter<A: Assembler + 'static>(
    chapter: ChapterReference,
    extractor: &ImageExtractor,
    resources: &TaskResources<A>,
    output_dir: &Path,
    merge_mode: bool,
    merge_entries: &Mutex<Vec<MergeEntry>>,
) -> Result<ChapterResult> {
    let url = chapter.source_url.clone();
    transition(&url, ChapterState::Pending);

    let output_path = document_path(output_dir, &chapter.title);
    if resources.cache.exists(&output_path) {
        log::info!(
            "Skipping chapter {}: {} already exists",
            chapter.title,
            path_to_string_lossy(&output_path)
        );
        resources.summary.record_skipped();
        transition(&url, ChapterState::Done);
        return Ok(ChapterResult::AlreadyPresent { output_path });
    }

    transition(&url, ChapterState::Extracting);
    let image_urls = match extractor.extract(&url).await {
        Ok(urls) if urls.is_empty() => {
            transition(&url, ChapterState::Failed);
            return Err(Error::NoImages(url));
        }
        Ok(urls) => urls,
        Err(e) => {
            transition(&url, ChapterState::Failed);
            return Err(e);
        }
    };

    if merge_mode {
        let image_count = image_urls.len();
        let ordinal = chapter.ordinal;
        merge_entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MergeEntry {
                chapter,
                image_urls,
            });
        transition(&url, ChapterState::Done);
        return Ok(ChapterResult::Deferred {
            ordinal,
            image_count,
        });
    }

    transition(&url, ChapterState::Assembling);
    match resources.assemble(&url, &image_urls, &output_path).await {
        Ok(image_count) => {
            resources.summary.record_written(output_path.clone(), image_count);
            transition(&url, ChapterState::Done);
            Ok(ChapterResult::Written {
                output_path,
                image_count,
            })
        }
        Err(e) => {
            transition(&url, ChapterState::Failed);
            Err(e)
        }
    }
}
