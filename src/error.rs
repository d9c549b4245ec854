//! Custom error types and result handling for comdown operations.
//!
//! Every fallible operation in the crate returns a [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Foreign errors convert transparently; the
//! domain variants follow the run's failure taxonomy (configuration, network,
//! soft content, persistence).

/// Type alias for Results with comdown errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all comdown operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Image decode/encode errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// PDF construction or serialization errors
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
    /// Transport errors that survived the retry policy
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Site table parsing errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::comdown::ComdownConfigBuilderError),

    /// No site configuration matches the hostname of the target URL
    #[error("Unsupported site: no scraper configuration for host '{0}'")]
    UnsupportedSite(String),
    /// A series URL that cannot be mapped to an output directory
    #[error("Invalid series URL: {0}")]
    InvalidTarget(String),
    /// A single/range selection that does not fit the discovered chapter list
    #[error("Invalid chapter selection: {0}")]
    InvalidSelection(String),
    /// A configured CSS selector that cannot be parsed
    #[error("Invalid selector '{0}'")]
    Selector(String),
    /// The chapter page loaded but produced no image links, or no image survived transform
    #[error("No images found for chapter: {0}")]
    NoImages(String),
    /// Persist was called on a document without pages
    #[error("Document has no pages")]
    EmptyDocument,
    /// Image bytes that cannot be placed on a page
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    /// An image deliberately left out of the document (animated, blank, excluded type)
    #[error("Skipped image {url}: {reason}")]
    SkippedImage { url: String, reason: String },
    /// A response with a non-success status where content was required
    #[error("Request to {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },
    /// A pending task observed cancellation before starting its work
    #[error("Run cancelled")]
    Cancelled,
    /// A chapter or batch task failure, wrapped with the offending URL or title
    #[error("{url}: {source}")]
    Chapter {
        url: String,
        #[source]
        source: Box<Error>,
    },
    /// Combined report of independent failures
    #[error("completed with {} errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Wraps `self` with the URL (or batch title) of the task that produced it.
    pub fn for_url(self, url: impl Into<String>) -> Self {
        Error::Chapter {
            url: url.into(),
            source: Box::new(self),
        }
    }

    /// True for the cooperative-cancellation marker, which is never reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Chapter { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}
