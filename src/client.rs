//! HTTP transport consumed by the collector, extractor and image pipeline.
//!
//! The pipeline only depends on the [`PageFetcher`] trait. [`HttpClient`] is the
//! production implementation on top of `reqwest`, with retry/backoff for transport
//! errors and 5xx responses. Non-success statuses are returned to the caller rather
//! than raised, since hosting sites routinely answer scrapers with 403/429/503.

use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use rand::seq::SliceRandom;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::error::Result;

const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);
const DEFAULT_RETRY_MAX_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser user agents; most hosts reject obvious library agents.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Raw response handed back by a [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub status: u16,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `charset` parameter of the content type, if any.
    pub fn charset(&self) -> Option<&str> {
        self.content_type
            .as_deref()?
            .split(';')
            .skip(1)
            .find_map(|param| {
                let (name, value) = param.split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"'))
            })
    }

    /// Body decoded with the declared charset, UTF-8 when absent or unknown.
    /// A byte order mark overrides the declaration; malformed sequences are replaced.
    pub fn text(&self) -> String {
        let encoding = self
            .charset()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&self.bytes);
        text.into_owned()
    }
}

/// Source of page and image bytes.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`. Implementations retry transient failures themselves; an `Err`
    /// means the retries are exhausted. Non-success statuses come back as `Ok`.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Host-level blocking signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    TooManyRequests,
    Forbidden,
    ServiceUnavailable,
}

impl BlockStatus {
    pub fn classify(status: u16) -> Option<Self> {
        match status {
            429 => Some(BlockStatus::TooManyRequests),
            403 => Some(BlockStatus::Forbidden),
            503 => Some(BlockStatus::ServiceUnavailable),
            _ => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            BlockStatus::TooManyRequests => "IP blocked: Too Many Requests (429)",
            BlockStatus::Forbidden => "IP blocked: Forbidden (403)",
            BlockStatus::ServiceUnavailable => "IP blocked: Service Unavailable (503)",
        }
    }
}

/// Logs a warning when `page` carries a blocking status. Returns whether it did.
pub fn check_block_status(url: &str, page: &FetchedPage) -> bool {
    match BlockStatus::classify(page.status) {
        Some(block) => {
            log::warn!("BLOCKED: {} ({})", block.reason(), url);
            true
        }
        None => false,
    }
}

/// Transport settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpOptions {
    pub retry_count: u32,
    pub retry_wait: Duration,
    pub retry_max_wait: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_wait: DEFAULT_RETRY_WAIT,
            retry_max_wait: DEFAULT_RETRY_MAX_WAIT,
            timeout: DEFAULT_TIMEOUT,
            user_agent: user_agent.to_string(),
        }
    }
}

impl HttpOptions {
    /// Replaces zero/empty settings with defaults.
    fn normalized(mut self) -> Self {
        let defaults = HttpOptions::default();
        if self.retry_wait.is_zero() {
            self.retry_wait = defaults.retry_wait;
        }
        if self.retry_max_wait.is_zero() {
            self.retry_max_wait = defaults.retry_max_wait;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.user_agent.is_empty() {
            self.user_agent = defaults.user_agent;
        }
        self
    }

    /// Exponential backoff for the given 1-based retry attempt, capped at `retry_max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_wait
            .saturating_mul(factor)
            .min(self.retry_max_wait)
    }
}

/// `reqwest`-backed [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    options: HttpOptions,
}

impl HttpClient {
    pub fn new(options: HttpOptions) -> Result<Self> {
        let options = options.normalized();
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        log::info!(
            "Initializing HTTP client with {} retries, timeout {:?}",
            options.retry_count,
            options.timeout
        );
        Ok(Self { client, options })
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<FetchedPage, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.options.user_agent)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedPage {
            bytes,
            content_type,
            status,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let mut attempt = 0;
        loop {
            let outcome = self.fetch_once(url).await;
            let retryable = match &outcome {
                Ok(page) => page.status >= 500,
                Err(_) => true,
            };

            if !retryable || attempt >= self.options.retry_count {
                let page = outcome?;
                check_block_status(url, &page);
                return Ok(page);
            }

            attempt += 1;
            match &outcome {
                Ok(page) => log::warn!(
                    "Retrying {} due to status code [{}] (attempt {})",
                    url,
                    page.status,
                    attempt
                ),
                Err(e) => log::warn!("Retrying {} due to error: {} (attempt {})", url, e, attempt),
            }
            tokio::time::sleep(self.options.backoff(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_status_classification() {
        assert_eq!(BlockStatus::classify(429), Some(BlockStatus::TooManyRequests));
        assert_eq!(BlockStatus::classify(403), Some(BlockStatus::Forbidden));
        assert_eq!(BlockStatus::classify(503), Some(BlockStatus::ServiceUnavailable));
        assert_eq!(BlockStatus::classify(404), None);
        assert_eq!(BlockStatus::classify(200), None);
    }

    fn page(bytes: &[u8], content_type: Option<&str>) -> FetchedPage {
        FetchedPage {
            bytes: bytes.to_vec(),
            content_type: content_type.map(str::to_string),
            status: 200,
        }
    }

    #[test]
    fn test_text_honors_declared_charset() {
        let latin = page(b"caf\xE9", Some("text/html; charset=windows-1252"));
        assert_eq!(latin.charset(), Some("windows-1252"));
        assert_eq!(latin.text(), "caf\u{e9}");

        let quoted = page(b"caf\xE9", Some("text/html;Charset=\"ISO-8859-1\""));
        assert_eq!(quoted.text(), "caf\u{e9}");
    }

    #[test]
    fn test_text_defaults_to_utf8() {
        let utf8 = "caf\u{e9}".as_bytes();
        assert_eq!(page(utf8, None).text(), "caf\u{e9}");
        assert_eq!(page(utf8, Some("text/html")).text(), "caf\u{e9}");
        assert_eq!(page(utf8, Some("text/html; charset=bogus")).text(), "caf\u{e9}");
        assert_eq!(page(b"caf\xE9", None).text(), "caf\u{fffd}");
    }

    #[test]
    fn test_backoff_is_capped() {
        let options = HttpOptions {
            retry_wait: Duration::from_secs(2),
            retry_max_wait: Duration::from_secs(10),
            ..HttpOptions::default()
        };
        assert_eq!(options.backoff(1), Duration::from_secs(2));
        assert_eq!(options.backoff(2), Duration::from_secs(4));
        assert_eq!(options.backoff(3), Duration::from_secs(8));
        assert_eq!(options.backoff(4), Duration::from_secs(10));
        assert_eq!(options.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_normalized_fills_defaults() {
        let options = HttpOptions {
            retry_count: 0,
            retry_wait: Duration::ZERO,
            retry_max_wait: Duration::ZERO,
            timeout: Duration::ZERO,
            user_agent: String::new(),
        }
        .normalized();
        assert_eq!(options.retry_count, 0);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(!options.user_agent.is_empty());
    }
}
