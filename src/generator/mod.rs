//! Document assembly.
//!
//! [`Assembler`] is the common interface for document builders; [`pdf::PdfAssembler`]
//! is the PDF implementation. Builders are expensive to set up, so tasks borrow them
//! from an [`pool::AssemblerPool`] and hand them back reset.

use crate::error::Result;
use crate::types::ImageAsset;
use async_trait::async_trait;
use std::path::Path;

pub mod pdf;
pub mod pool;

/// Common interface for reusable document builders.
///
/// An assembler accumulates pages until [`persist`](Assembler::persist) writes them out,
/// and [`reset`](Assembler::reset) must return it to a state indistinguishable from a
/// freshly constructed one.
#[async_trait]
pub trait Assembler: Send {
    /// Creates an empty builder.
    fn create() -> Self
    where
        Self: Sized;

    /// Appends one page sized to the image.
    ///
    /// # Returns
    /// * `Err(Error::InvalidImage)` when the asset cannot be placed; the document is unchanged.
    fn append_image(&mut self, image: &ImageAsset) -> Result<()>;

    /// Number of pages appended since creation or the last reset.
    fn page_count(&self) -> usize;

    /// Writes the accumulated document to `path`.
    ///
    /// # Returns
    /// * `Err(Error::EmptyDocument)` if no page was appended
    /// * `Err(Error::Io)` if the write fails
    async fn persist(&mut self, path: &Path) -> Result<()>;

    /// Drops every page and restores the initial state.
    fn reset(&mut self);
}
