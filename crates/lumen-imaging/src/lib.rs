//! Image downscaling for Lumen
//!
//! `ImageResizer` shrinks a photograph so its longest side fits the
//! request's `max_image_dimension` before it is handed to the engine.
//! Images that already fit, and are in a format every engine accepts, are
//! passed through untouched.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::debug;

use lumen_core::{Error, ImagePreprocessor, PreparedImage, Result};

/// Downscales images into temporary JPEG files
#[derive(Debug, Clone)]
pub struct ImageResizer {
    filter: FilterType,
    jpeg_quality: u8,
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self {
            filter: FilterType::Triangle,
            jpeg_quality: 90,
        }
    }
}

impl ImageResizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// JPEG quality of the re-encoded image, clamped to 1..=100
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    fn prepare_blocking(&self, image: PathBuf, max_dimension: u32) -> Result<PreparedImage> {
        if max_dimension == 0 {
            return Err(Error::InvalidInput(
                "max_image_dimension must be positive".to_string(),
            ));
        }

        let (width, height) = image::image_dimensions(&image).map_err(|e| {
            Error::Preprocess(format!("Cannot read image {}: {}", image.display(), e))
        })?;

        if width.max(height) <= max_dimension && is_engine_native(&image) {
            debug!(width, height, max_dimension, "image already fits, using original");
            return Ok(PreparedImage::Original(image));
        }

        let decoded = image::open(&image).map_err(|e| {
            Error::Preprocess(format!("Cannot decode image {}: {}", image.display(), e))
        })?;

        let flattened = flatten_onto_white(&decoded);
        let resized = if width.max(height) > max_dimension {
            DynamicImage::ImageRgb8(flattened)
                .resize(max_dimension, max_dimension, self.filter)
                .to_rgb8()
        } else {
            flattened
        };

        debug!(
            from_width = width,
            from_height = height,
            to_width = resized.width(),
            to_height = resized.height(),
            "downscaled image"
        );

        let temp = tempfile::Builder::new()
            .prefix("lumen-")
            .suffix(".jpg")
            .tempfile()?
            .into_temp_path();

        let mut writer = BufWriter::new(File::create(&temp)?);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(&resized)
            .map_err(|e| Error::Preprocess(format!("Cannot encode resized image: {}", e)))?;
        writer.flush()?;

        Ok(PreparedImage::Temporary(temp))
    }
}

#[async_trait]
impl ImagePreprocessor for ImageResizer {
    async fn prepare(&self, image: &Path, max_dimension: u32) -> Result<PreparedImage> {
        let resizer = self.clone();
        let image = image.to_path_buf();

        tokio::task::spawn_blocking(move || resizer.prepare_blocking(image, max_dimension))
            .await
            .map_err(|e| Error::Preprocess(format!("Resize task failed: {}", e)))?
    }
}

fn is_engine_native(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Composite any alpha channel onto a white background
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8;
        Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
    })
}
