//! Common test utilities for the comdown crate.
//!
//! Provides an in-memory [`PageFetcher`] serving canned listing pages, chapter
//! pages and images, fixture image generation, unique test directories and PDF
//! readback helpers.

use async_trait::async_trait;
use comdown::client::{FetchedPage, PageFetcher};
use comdown::error::Result;
use comdown::site::SiteRegistry;
use comdown::types::ScraperConfig;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
#[allow(dead_code)]
pub const TEST_HOST: &str = "comics.test";
#[allow(dead_code)]
pub const SERIES_URL: &str = "https://comics.test/series/demo-title/";
#[allow(dead_code)]
pub const SERIES_SLUG: &str = "demo-title";

/// Creates a unique, empty output root for one test.
#[allow(dead_code)]
pub async fn setup_test_dir(sub_path: &str) -> PathBuf {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let test_dir = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).await.unwrap();
    }
    fs::create_dir_all(&test_dir).await.unwrap();
    test_dir
}

#[allow(dead_code)]
pub async fn cleanup_test_dir(path: &Path) {
    if path.exists() {
        let _ = fs::remove_dir_all(path).await;
    }
}

/// Site entry matching the pages produced by [`MockFetcher::add_series`].
#[allow(dead_code)]
pub fn test_site() -> ScraperConfig {
    ScraperConfig {
        hostname: TEST_HOST.to_string(),
        chapter_list_selector: "ul.chapters li a".to_string(),
        chapter_link_attr: "href".to_string(),
        image_list_selector: "div.reader img".to_string(),
        image_attr: "src".to_string(),
        pattern: None,
        chapter_pattern: None,
    }
}

#[allow(dead_code)]
pub fn test_registry() -> SiteRegistry {
    SiteRegistry::new(vec![test_site()])
}

/// Encodes a solid-color JPEG of the given size.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Jpeg)
}

/// Encodes a solid-color PNG of the given size.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Png)
}

fn encode(width: u32, height: u32, color: Rgb<u8>, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, color));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

#[allow(dead_code)]
pub fn chapter_url(number: usize) -> String {
    format!("https://{}/{}-chapter-{}/", TEST_HOST, SERIES_SLUG, number)
}

#[allow(dead_code)]
pub fn image_url(chapter: usize, page: usize) -> String {
    format!("https://cdn.{}/{}/{:03}.jpg", TEST_HOST, chapter, page)
}

/// Listing page with chapters newest first, the way hosting sites list them.
#[allow(dead_code)]
pub fn listing_html(chapter_urls: &[String]) -> String {
    let items: String = chapter_urls
        .iter()
        .rev()
        .map(|url| format!("<li><a href=\"{}\">Chapter</a></li>", url))
        .collect();
    format!("<html><body><ul class=\"chapters\">{}</ul></body></html>", items)
}

#[allow(dead_code)]
pub fn chapter_html(image_urls: &[String]) -> String {
    let images: String = image_urls
        .iter()
        .map(|url| format!("<img src=\"{}\"/>", url))
        .collect();
    format!("<html><body><div class=\"reader\">{}</div></body></html>", images)
}

/// In-memory [`PageFetcher`]. Unknown URLs answer 404; every request is recorded.
#[derive(Default)]
pub struct MockFetcher {
    pages: Mutex<HashMap<String, FetchedPage>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a latency to every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(
        &self,
        url: impl Into<String>,
        status: u16,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) {
        self.pages.lock().unwrap().insert(
            url.into(),
            FetchedPage {
                bytes,
                content_type: content_type.map(|c| c.to_string()),
                status,
            },
        );
    }

    pub fn serve_html(&self, url: impl Into<String>, html: &str) {
        self.serve(url, 200, html.as_bytes().to_vec(), Some("text/html; charset=utf-8"));
    }

    pub fn serve_image(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.serve(url, 200, bytes, Some("image/jpeg"));
    }

    pub fn serve_status(&self, url: impl Into<String>, status: u16) {
        self.serve(url, status, Vec::new(), None);
    }

    /// Serves a full series at [`SERIES_URL`]: chapter `n` gets `pages(n)` JPEG images.
    pub fn add_series(&self, chapters: usize, pages: impl Fn(usize) -> usize) {
        let chapter_urls: Vec<String> = (1..=chapters).map(chapter_url).collect();
        self.serve_html(SERIES_URL, &listing_html(&chapter_urls));

        for number in 1..=chapters {
            let image_urls: Vec<String> =
                (1..=pages(number)).map(|p| image_url(number, p)).collect();
            self.serve_html(chapter_url(number), &chapter_html(&image_urls));
            for (index, url) in image_urls.iter().enumerate() {
                let shade = ((number * 10 + index) % 200) as u8;
                self.serve_image(url.clone(), jpeg_bytes(64, 48, Rgb([shade, 80, 160])));
            }
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests for image URLs (anything on the CDN host).
    pub fn image_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.contains(&format!("cdn.{}", TEST_HOST)))
            .count()
    }

    pub fn was_requested(&self, url: &str) -> bool {
        self.requests.lock().unwrap().iter().any(|u| u == url)
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.lock().unwrap().get(url).cloned();
        Ok(page.unwrap_or(FetchedPage {
            bytes: Vec::new(),
            content_type: None,
            status: 404,
        }))
    }
}

/// Number of pages in the PDF at `path`.
#[allow(dead_code)]
pub fn pdf_page_count(path: &Path) -> usize {
    lopdf::Document::load(path).unwrap().get_pages().len()
}

/// MediaBox `[width, height]` of every page, in page order.
#[allow(dead_code)]
pub fn pdf_page_sizes(path: &Path) -> Vec<(f32, f32)> {
    let document = lopdf::Document::load(path).unwrap();
    document
        .get_pages()
        .values()
        .map(|id| {
            let page = document.get_dictionary(*id).unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            (
                media_box[2].as_float().unwrap(),
                media_box[3].as_float().unwrap(),
            )
        })
        .collect()
}
