//! Image fetch, validation and normalization.
//!
//! Every image goes through: extension guard → fetch → format sniffing →
//! animated/unsupported rejection → decode → blank-page detection →
//! optional enhancement → normalization to JPEG. The output is an
//! [`ImageAsset`] the assembler can place on a page without further checks.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tokio::task::spawn_blocking;

use crate::client::{PageFetcher, check_block_status};
use crate::error::{Error, Result};
use crate::site::{has_acceptable_extension, url_extension};
use crate::types::{ImageAsset, PixelLayout};

/// JPEG quality used whenever an image is re-encoded.
pub const JPEG_QUALITY: u8 = 100;
/// Pixel area above which a near-white image is treated as a placeholder.
pub const BLANK_MIN_AREA: u64 = 1_000_000;
/// Minimum channel value for a sampled pixel to count as white.
const BLANK_WHITE_THRESHOLD: u8 = 250;
/// Enhancement parameters: 2x Lanczos upscale, unsharp mask, contrast boost.
const ENHANCE_SCALE: u32 = 2;
const ENHANCE_SHARPEN_SIGMA: f32 = 0.7;
const ENHANCE_SHARPEN_THRESHOLD: i32 = 1;
const ENHANCE_CONTRAST: f32 = 10.0;

/// Fetches and normalizes single images.
#[derive(Clone)]
pub struct ImagePipeline {
    fetcher: Arc<dyn PageFetcher>,
    enhance: bool,
}

impl ImagePipeline {
    pub fn new(fetcher: Arc<dyn PageFetcher>, enhance: bool) -> Self {
        Self { fetcher, enhance }
    }

    /// Fetches `image_url` and returns a normalized asset.
    ///
    /// Every error is meant to be logged and skipped by the caller; one bad
    /// image never aborts its chapter.
    pub async fn process(&self, image_url: &str) -> Result<ImageAsset> {
        if !has_acceptable_extension(image_url) {
            return Err(Error::SkippedImage {
                url: image_url.to_string(),
                reason: "unsupported extension".to_string(),
            });
        }
        if url_extension(image_url).as_deref() == Some("gif") {
            return Err(Error::SkippedImage {
                url: image_url.to_string(),
                reason: "animated format".to_string(),
            });
        }

        let page = self.fetcher.fetch(image_url).await?;
        if !page.is_success() {
            check_block_status(image_url, &page);
            return Err(Error::HttpStatus {
                url: image_url.to_string(),
                status: page.status,
            });
        }

        let url = image_url.to_string();
        let enhance = self.enhance;
        let content_type = page.content_type;
        let bytes = page.bytes;
        spawn_blocking(move || normalize_image(bytes, &url, content_type.as_deref(), enhance))
            .await?
    }
}

/// Determines the served format from the bytes, then the content type, then the URL.
pub fn detect_format(bytes: &[u8], content_type: Option<&str>, url: &str) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .or_else(|| {
            content_type
                .and_then(|ct| ct.split(';').next())
                .and_then(|mime| ImageFormat::from_mime_type(mime.trim()))
        })
        .or_else(|| url_extension(url).and_then(ImageFormat::from_extension))
}

/// Decodes, validates, optionally enhances and re-encodes one image.
///
/// CPU-bound; run it on a blocking thread.
pub fn normalize_image(
    bytes: Vec<u8>,
    url: &str,
    content_type: Option<&str>,
    enhance: bool,
) -> Result<ImageAsset> {
    let skipped = |reason: &str| Error::SkippedImage {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if bytes.is_empty() {
        return Err(skipped("empty body"));
    }

    let format =
        detect_format(&bytes, content_type, url).ok_or_else(|| skipped("unknown format"))?;
    match format {
        ImageFormat::Gif => return Err(skipped("animated format")),
        ImageFormat::Jpeg
        | ImageFormat::Png
        | ImageFormat::WebP
        | ImageFormat::Bmp
        | ImageFormat::Tiff => {}
        other => return Err(skipped(&format!("unsupported format {:?}", other))),
    }

    let decoded = image::load_from_memory_with_format(&bytes, format)?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(skipped("zero-sized image"));
    }
    if is_blank_image(&decoded) {
        return Err(skipped("blank placeholder page"));
    }

    let passthrough = if format == ImageFormat::Jpeg && !enhance {
        jpeg_frame_components(&bytes).and_then(passthrough_layout)
    } else {
        None
    };
    if let Some(layout) = passthrough {
        return Ok(ImageAsset {
            bytes,
            source_url: url.to_string(),
            decoded_format: format,
            layout,
            pixel_width: width,
            pixel_height: height,
        });
    }

    let layout = match &decoded {
        DynamicImage::ImageLuma8(_) => PixelLayout::Gray,
        _ => PixelLayout::Rgb,
    };

    let processed = if enhance {
        log::debug!("Enhancing {}", url);
        enhance_image(&decoded)
    } else {
        decoded
    };
    let (pixel_width, pixel_height) = processed.dimensions();
    let encoded = encode_jpeg(&processed, layout)?;

    Ok(ImageAsset {
        bytes: encoded,
        source_url: url.to_string(),
        decoded_format: format,
        layout,
        pixel_width,
        pixel_height,
    })
}

/// Component count of the first frame header of an 8-bit JPEG stream.
///
/// `None` for anything else, including 12-bit precision and streams whose
/// headers end before a frame is declared.
pub fn jpeg_frame_components(bytes: &[u8]) -> Option<u8> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        match marker {
            // fill byte
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            // start of scan or end of image without a frame
            0xD9 | 0xDA => return None,
            // SOF0..SOF15 except DHT, JPG and DAC
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let precision = *bytes.get(pos + 4)?;
                let components = *bytes.get(pos + 9)?;
                return (precision == 8).then_some(components);
            }
            _ => {}
        }
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 2 + length;
    }
    None
}

/// Layout under which JPEG bytes can be embedded as-is. Only 1-component and
/// 3-component streams match DeviceGray/DeviceRGB; CMYK and YCCK streams
/// (4 components) must be re-encoded.
pub fn passthrough_layout(components: u8) -> Option<PixelLayout> {
    match components {
        1 => Some(PixelLayout::Gray),
        3 => Some(PixelLayout::Rgb),
        _ => None,
    }
}

/// Encodes to JPEG at [`JPEG_QUALITY`], dropping any alpha channel.
pub fn encode_jpeg(img: &DynamicImage, layout: PixelLayout) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
        match layout {
            PixelLayout::Gray => encoder.encode_image(&img.to_luma8())?,
            PixelLayout::Rgb => encoder.encode_image(&img.to_rgb8())?,
        }
    }
    Ok(buffer)
}

/// 2x Lanczos upscale, sharpening and a contrast boost.
pub fn enhance_image(img: &DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    img.resize_exact(
        width.saturating_mul(ENHANCE_SCALE),
        height.saturating_mul(ENHANCE_SCALE),
        FilterType::Lanczos3,
    )
    .unsharpen(ENHANCE_SHARPEN_SIGMA, ENHANCE_SHARPEN_THRESHOLD)
    .adjust_contrast(ENHANCE_CONTRAST)
}

/// Detects near-white placeholder images served instead of real pages.
///
/// Only large images qualify; the four corners and the center are sampled and
/// all five must be white (or fully transparent).
pub fn is_blank_image(img: &DynamicImage) -> bool {
    let (width, height) = img.dimensions();
    if (width as u64) * (height as u64) < BLANK_MIN_AREA {
        return false;
    }

    let (max_x, max_y) = (width - 1, height - 1);
    let samples = [
        (0, 0),
        (max_x, 0),
        (0, max_y),
        (max_x, max_y),
        (width / 2, height / 2),
    ];

    samples.iter().all(|&(x, y)| {
        let [r, g, b, a] = img.get_pixel(x, y).0;
        a == 0
            || (r >= BLANK_WHITE_THRESHOLD
                && g >= BLANK_WHITE_THRESHOLD
                && b >= BLANK_WHITE_THRESHOLD)
    })
}
