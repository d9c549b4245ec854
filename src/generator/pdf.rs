use crate::error::{Error, Result};
use crate::generator::Assembler;
use crate::path_utils::path_to_string_lossy;
use crate::types::ImageAsset;
use async_trait::async_trait;
use chrono::Utc;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::path::Path;
use tokio::fs;

/// Resolution assumed when converting pixels to points.
pub const ASSUMED_DPI: f32 = 128.0;
const POINTS_PER_INCH: f32 = 72.0;
/// Inset subtracted from each page edge to avoid clipping artifacts.
const PAGE_INSET: f32 = 1.0;
const PDF_VERSION: &str = "1.5";
const PRODUCER: &str = "comdown";

/// Smallest pixel extent whose page extent stays positive after the inset.
pub const MIN_PIXEL_EXTENT: u32 = 2;

/// Converts a pixel extent to a page extent in points.
pub fn pixels_to_points(pixels: u32) -> f32 {
    pixels as f32 * POINTS_PER_INCH / ASSUMED_DPI - PAGE_INSET
}

/// A PDF builder holding one full-bleed JPEG image per page.
pub struct PdfAssembler {
    document: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfAssembler {
    fn empty() -> Self {
        let mut document = Document::with_version(PDF_VERSION);
        let pages_id = document.new_object_id();
        PdfAssembler {
            document,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    /// Serializes the document: page tree, catalog and info dictionary.
    fn render(&mut self) -> Result<Vec<u8>> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::Reference(*id)).collect();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.page_ids.len() as i64,
        };
        self.document
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.document.add_object(dictionary! {
            "Producer" => Object::string_literal(PRODUCER),
            "CreationDate" =>
                Object::string_literal(Utc::now().format("D:%Y%m%d%H%M%SZ").to_string()),
        });
        self.document.trailer.set("Root", catalog_id);
        self.document.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        self.document.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[async_trait]
impl Assembler for PdfAssembler {
    fn create() -> Self {
        log::debug!("Creating new PDF document");
        Self::empty()
    }

    fn append_image(&mut self, image: &ImageAsset) -> Result<()> {
        if image.bytes.len() < 2 || image.bytes[..2] != [0xFF, 0xD8] {
            return Err(Error::InvalidImage(format!(
                "{}: not a JPEG stream",
                image.source_url
            )));
        }
        if image.pixel_width < MIN_PIXEL_EXTENT || image.pixel_height < MIN_PIXEL_EXTENT {
            return Err(Error::InvalidImage(format!(
                "{}: {}x{} is too small for a page",
                image.source_url, image.pixel_width, image.pixel_height
            )));
        }

        let width = pixels_to_points(image.pixel_width);
        let height = pixels_to_points(image.pixel_height);

        let image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.pixel_width as i64,
                "Height" => image.pixel_height as i64,
                "ColorSpace" => image.layout.color_space(),
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.bytes.clone(),
        )
        .with_compression(false);
        let image_id = self.document.add_object(image_stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0.into(),
                        0.into(),
                        height.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .document
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    async fn persist(&mut self, path: &Path) -> Result<()> {
        if self.page_ids.is_empty() {
            return Err(Error::EmptyDocument);
        }
        log::info!("Saving PDF to: {}", path_to_string_lossy(path));

        let bytes = self.render()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, bytes).await?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }
}
