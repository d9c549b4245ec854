//! Batch merging of chapters into multi-chapter documents.
//!
//! Chapter tasks hand their image lists over as [`MergeEntry`] values, in
//! whatever order they finished. Planning sorts them by ordinal, groups them
//! into consecutive runs of `batch_size`, and each batch becomes one document
//! named after its first and last chapter (`"1-5"`, or `"7"` for a batch of one).

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::generator::Assembler;
use crate::path_utils::{document_path, path_to_string_lossy};
use crate::scheduler::{BoundedOutcome, TaskResources, run_bounded};
use crate::types::{ChapterReference, OrdinalSource, format_ordinal};

/// One chapter's image list, waiting to be merged.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeEntry {
    pub chapter: ChapterReference,
    pub image_urls: Vec<String>,
}

/// A planned multi-chapter document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeBatch {
    pub title: String,
    pub chapters: Vec<ChapterReference>,
    /// Images of every chapter in the batch, in chapter order.
    pub image_urls: Vec<String>,
}

/// Orders chapters by ordinal, falling back to the title when ordinals tie or are NaN.
pub fn compare_chapters(a: &ChapterReference, b: &ChapterReference) -> Ordering {
    a.ordinal
        .partial_cmp(&b.ordinal)
        .filter(|ordering| *ordering != Ordering::Equal)
        .unwrap_or_else(|| a.title.cmp(&b.title))
}

/// `"first-last"`, or just `"first"` when both are the same chapter.
pub fn batch_title(first: &ChapterReference, last: &ChapterReference) -> String {
    let start = format_ordinal(first.ordinal);
    let end = format_ordinal(last.ordinal);
    if start == end {
        start
    } else {
        format!("{}-{}", start, end)
    }
}

/// Sorts `entries` and groups them into batches of at most `batch_size` chapters.
///
/// The final batch holds the remainder. A `batch_size` of zero is treated as one.
pub fn plan_batches(mut entries: Vec<MergeEntry>, batch_size: usize) -> Vec<MergeBatch> {
    if entries.is_empty() {
        return Vec::new();
    }

    let mixed = entries
        .iter()
        .any(|e| e.chapter.ordinal_source == OrdinalSource::Positional)
        && entries
            .iter()
            .any(|e| e.chapter.ordinal_source == OrdinalSource::Parsed);
    if mixed {
        log::warn!(
            "Merging chapters with both parsed and positional ordinals; \
             batch titles may be ambiguous"
        );
    }

    entries.par_sort_by(|a, b| compare_chapters(&a.chapter, &b.chapter));

    entries
        .chunks(batch_size.max(1))
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            Some(MergeBatch {
                title: batch_title(&first.chapter, &last.chapter),
                chapters: group.iter().map(|e| e.chapter.clone()).collect(),
                image_urls: group.iter().flat_map(|e| e.image_urls.iter().cloned()).collect(),
            })
        })
        .collect()
}

/// Writes planned batches with the same bounds and failure policy as the chapter stage.
pub struct MergeEngine<A: Assembler + 'static> {
    resources: TaskResources<A>,
}

impl<A: Assembler + 'static> MergeEngine<A> {
    pub fn new(resources: TaskResources<A>) -> Self {
        Self { resources }
    }

    /// Assembles every batch into `output_dir`.
    ///
    /// Batches whose output already exists are skipped.
    pub async fn run(
        &self,
        batches: Vec<MergeBatch>,
        output_dir: &Path,
    ) -> Result<BoundedOutcome<PathBuf>> {
        log::info!("Merging into {} documents", batches.len());

        let resources = self.resources.clone();
        let output_dir = output_dir.to_path_buf();

        run_bounded(
            batches,
            self.resources.max_concurrent,
            self.resources.policy,
            move |batch: MergeBatch| {
                let resources = resources.clone();
                let output_path = document_path(&output_dir, &batch.title);
                async move {
                    let label = format!("batch {}", batch.title);
                    write_batch(&resources, &batch, &output_path)
                        .await
                        .map_err(|e| Error::Chapter {
                            url: label,
                            source: Box::new(e),
                        })
                }
            },
        )
        .await
    }
}

async fn write_batch<A: Assembler + 'static>(
    resources: &TaskResources<A>,
    batch: &MergeBatch,
    output_path: &Path,
) -> Result<PathBuf> {
    if resources.cache.exists(output_path) {
        log::info!(
            "Skipping batch {}: {} already exists",
            batch.title,
            path_to_string_lossy(output_path)
        );
        resources.summary.record_skipped();
        return Ok(output_path.to_path_buf());
    }

    log::info!(
        "Merging {} chapters ({} images) into {}",
        batch.chapters.len(),
        batch.image_urls.len(),
        batch.title
    );
    let pages = resources
        .assemble(&batch.title, &batch.image_urls, output_path)
        .await?;
    resources.summary.record_written(output_path.to_path_buf(), pages);
    Ok(output_path.to_path_buf())
}
