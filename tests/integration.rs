//! End-to-end runs through `Comdown::run` against the in-memory fetcher.

use comdown::error::{Error, Result};
use comdown::prelude::*;
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{
    MockFetcher, SERIES_SLUG, SERIES_URL, TEST_TIMEOUT, chapter_html, chapter_url, cleanup_test_dir,
    image_url, pdf_page_count, setup_test_dir, test_registry,
};

fn config(output_root: &Path) -> ComdownConfigBuilder {
    let mut builder = ComdownConfig::builder();
    builder.output_root(output_root.to_path_buf()).max_concurrent(4usize);
    builder
}

fn downloader(config: ComdownConfig, fetcher: &Arc<MockFetcher>) -> Comdown {
    Comdown::with_fetcher(config, test_registry(), fetcher.clone())
}

fn targets() -> Vec<String> {
    vec![SERIES_URL.to_string()]
}

#[tokio::test]
async fn test_range_writes_one_document_per_chapter() -> Result<()> {
    let test_dir = setup_test_dir("range_run").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(10, |_| 2);

    let config = config(&test_dir)
        .selection(SelectionPolicy::Range { min: 3, max: 5 })
        .build()?;
    let summary = timeout(TEST_TIMEOUT, downloader(config, &fetcher).run(&targets()))
        .await
        .expect("run timed out")?;

    let series_dir = test_dir.join(SERIES_SLUG);
    for number in 3..=5 {
        let path = series_dir.join(format!("{}.pdf", number));
        assert!(path.exists(), "missing {:?}", path);
        assert_eq!(pdf_page_count(&path), 2);
    }
    assert!(!series_dir.join("2.pdf").exists());
    assert!(!series_dir.join("6.pdf").exists());
    assert!(!fetcher.was_requested(&chapter_url(6)));

    assert_eq!(summary.chapters_requested, 3);
    assert_eq!(summary.generated_files.len(), 3);
    assert_eq!(summary.total_images_processed, 6);
    assert_eq!(summary.chapters_skipped, 0);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_rerun_skips_existing_without_network() -> Result<()> {
    let test_dir = setup_test_dir("idempotent_run").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(4, |_| 3);

    let config = config(&test_dir).build()?;
    downloader(config.clone(), &fetcher).run(&targets()).await?;
    let images_after_first = fetcher.image_requests();
    assert_eq!(images_after_first, 12);

    let second = downloader(config, &fetcher).run(&targets()).await?;
    assert_eq!(fetcher.image_requests(), images_after_first);
    let requests = fetcher.requests();
    for number in 1..=4 {
        let chapter_fetches = requests.iter().filter(|url| **url == chapter_url(number)).count();
        assert_eq!(chapter_fetches, 1);
    }
    assert_eq!(second.chapters_skipped, 4);
    assert!(second.generated_files.is_empty());
    assert_eq!(second.total_images_processed, 0);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_merge_batches_by_ordinal() -> Result<()> {
    let test_dir = setup_test_dir("merge_run").await;
    let fetcher = Arc::new(MockFetcher::new().with_delay(Duration::from_millis(2)));
    fetcher.add_series(11, |n| n % 3 + 1);

    let config = config(&test_dir).merge_size(5usize).build()?;
    let summary = downloader(config, &fetcher).run(&targets()).await?;

    let series_dir = test_dir.join(SERIES_SLUG);
    let expected_pages = |range: std::ops::RangeInclusive<usize>| -> usize {
        range.map(|n| n % 3 + 1).sum()
    };
    assert_eq!(pdf_page_count(&series_dir.join("1-5.pdf")), expected_pages(1..=5));
    assert_eq!(pdf_page_count(&series_dir.join("6-10.pdf")), expected_pages(6..=10));
    assert_eq!(pdf_page_count(&series_dir.join("11.pdf")), expected_pages(11..=11));
    assert!(!series_dir.join("1.pdf").exists());

    assert_eq!(summary.chapters_requested, 11);
    assert_eq!(summary.generated_files.len(), 3);
    assert_eq!(summary.total_images_processed, expected_pages(1..=11));

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_pooled_documents_do_not_leak_pages() -> Result<()> {
    let test_dir = setup_test_dir("pool_isolation").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(6, |n| n);

    let config = config(&test_dir).max_concurrent(1usize).build()?;
    let runner = downloader(config, &fetcher);
    runner.run(&targets()).await?;

    let series_dir = test_dir.join(SERIES_SLUG);
    for number in 1..=6 {
        assert_eq!(
            pdf_page_count(&series_dir.join(format!("{}.pdf", number))),
            number
        );
    }
    assert_eq!(runner.pool().created(), 1);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_continue_on_error_isolates_failed_chapter() -> Result<()> {
    let test_dir = setup_test_dir("partial_failure").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(4, |_| 2);
    fetcher.serve_html(chapter_url(2), &chapter_html(&[]));

    let config = config(&test_dir).continue_on_error(true).build()?;
    let result = downloader(config, &fetcher).run(&targets()).await;

    match result {
        Err(Error::Chapter { url, source }) => {
            assert_eq!(url, chapter_url(2));
            assert!(matches!(*source, Error::NoImages(_)));
        }
        other => panic!("expected a chapter failure, got {:?}", other),
    }

    let series_dir = test_dir.join(SERIES_SLUG);
    assert!(series_dir.join("1.pdf").exists());
    assert!(!series_dir.join("2.pdf").exists());
    assert!(series_dir.join("3.pdf").exists());
    assert!(series_dir.join("4.pdf").exists());

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_fail_fast_stops_pending_chapters() -> Result<()> {
    let test_dir = setup_test_dir("fail_fast").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(5, |_| 1);
    fetcher.serve_html(chapter_url(1), &chapter_html(&[]));

    let config = config(&test_dir).max_concurrent(1usize).build()?;
    let result = downloader(config, &fetcher).run(&targets()).await;

    assert!(matches!(result, Err(Error::Chapter { .. })));
    for number in 2..=5 {
        assert!(!fetcher.was_requested(&chapter_url(number)));
    }
    assert_eq!(fetcher.image_requests(), 0);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_bad_images_are_skipped_not_fatal() -> Result<()> {
    let test_dir = setup_test_dir("skip_images").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(1, |_| 1);
    let images = vec![
        image_url(1, 1),
        "https://cdn.comics.test/1/anim.gif".to_string(),
        "https://cdn.comics.test/1/missing.jpg".to_string(),
        "https://cdn.comics.test/1/notes.txt".to_string(),
    ];
    fetcher.serve_html(chapter_url(1), &chapter_html(&images));

    let config = config(&test_dir).build()?;
    let summary = downloader(config, &fetcher).run(&targets()).await?;

    assert_eq!(pdf_page_count(&test_dir.join(SERIES_SLUG).join("1.pdf")), 1);
    assert_eq!(summary.total_images_processed, 1);
    assert!(!fetcher.was_requested("https://cdn.comics.test/1/anim.gif"));
    assert!(!fetcher.was_requested("https://cdn.comics.test/1/notes.txt"));

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_chapter_without_surviving_images_fails() -> Result<()> {
    let test_dir = setup_test_dir("no_survivors").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(1, |_| 1);
    fetcher.serve_status(image_url(1, 1), 404);

    let config = config(&test_dir).build()?;
    let result = downloader(config, &fetcher).run(&targets()).await;

    assert!(matches!(result, Err(Error::Chapter { .. })));
    assert!(!test_dir.join(SERIES_SLUG).join("1.pdf").exists());

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_enhance_keeps_page_count() -> Result<()> {
    let test_dir = setup_test_dir("enhance_run").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(1, |_| 3);

    let plain_root = test_dir.join("plain");
    let enhanced_root = test_dir.join("enhanced");
    downloader(config(&plain_root).build()?, &fetcher)
        .run(&targets())
        .await?;
    downloader(config(&enhanced_root).enhance(true).build()?, &fetcher)
        .run(&targets())
        .await?;

    let plain = plain_root.join(SERIES_SLUG).join("1.pdf");
    let enhanced = enhanced_root.join(SERIES_SLUG).join("1.pdf");
    assert_eq!(pdf_page_count(&plain), 3);
    assert_eq!(pdf_page_count(&enhanced), 3);
    assert_eq!(common::pdf_page_sizes(&plain)[0], (35.0, 26.0));
    assert_eq!(common::pdf_page_sizes(&enhanced)[0], (71.0, 53.0));

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_site_fails_before_network() -> Result<()> {
    let test_dir = setup_test_dir("unsupported").await;
    let fetcher = Arc::new(MockFetcher::new());

    let config = config(&test_dir).build()?;
    let result = downloader(config, &fetcher)
        .run(&["https://elsewhere.example/series/x/".to_string()])
        .await;

    assert!(matches!(result, Err(Error::UnsupportedSite(_))));
    assert_eq!(fetcher.request_count(), 0);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_multiple_targets_collect_failures() -> Result<()> {
    let test_dir = setup_test_dir("multi_target").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(2, |_| 1);

    let config = config(&test_dir).build()?;
    let result = downloader(config, &fetcher)
        .run(&[
            SERIES_URL.to_string(),
            "https://elsewhere.example/series/x/".to_string(),
        ])
        .await;

    match result {
        Err(Error::Multiple(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].to_string().contains("elsewhere.example"));
        }
        other => panic!("expected combined failures, got {:?}", other),
    }
    assert!(test_dir.join(SERIES_SLUG).join("1.pdf").exists());
    assert!(test_dir.join(SERIES_SLUG).join("2.pdf").exists());

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_selection_is_configuration_error() -> Result<()> {
    let test_dir = setup_test_dir("bad_selection").await;
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.add_series(3, |_| 1);

    let config = config(&test_dir).selection(SelectionPolicy::Single(9)).build()?;
    let result = downloader(config, &fetcher).run(&targets()).await;

    assert!(matches!(result, Err(Error::InvalidSelection(_))));
    assert_eq!(fetcher.image_requests(), 0);

    cleanup_test_dir(&test_dir).await;
    Ok(())
}

#[tokio::test]
async fn test_site_table_from_json() -> Result<()> {
    let sites = SiteRegistry::from_json_str(
        r#"[
            {
                "hostname": "Comics.Test",
                "list_chapter_url": "a.first",
                "attr_chapter": "href",
                "list_image_url": "img",
                "attr_image": "src"
            },
            {
                "hostname": "comics.test",
                "list_chapter_url": "a.second",
                "attr_chapter": "href",
                "list_image_url": "img",
                "attr_image": "data-src"
            }
        ]"#,
    )?;
    let site = sites.resolve_url(SERIES_URL)?;
    assert_eq!(site.chapter_list_selector, "a.first");
    assert!(matches!(
        sites.resolve_url("https://other.test/x/"),
        Err(Error::UnsupportedSite(_))
    ));
    Ok(())
}
