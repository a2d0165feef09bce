//! Image validation with decompression-bomb protection.

use std::io::{BufReader, Read, Seek, SeekFrom};

use image::{ImageError, ImageFormat, ImageReader, Limits};
use tempfile::SpooledTempFile;

use super::error::ValidationError;
use crate::config::CacheConfig;

/// What decoding a buffer revealed about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedImage {
    /// Canonical file extension for the detected format, without the dot.
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Fully decodes candidate images under pixel and allocation limits.
#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_pixels: u64,
}

impl ImageValidator {
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_pixels)
    }

    /// Validate `buffer` on the blocking pool.
    ///
    /// The buffer is handed back rewound on success so it can be stored.
    pub async fn validate(
        &self,
        mut buffer: SpooledTempFile,
    ) -> Result<(SpooledTempFile, ValidatedImage), ValidationError> {
        let validator = *self;
        tokio::task::spawn_blocking(move || {
            let validated = validator.validate_sync(&mut buffer)?;
            Ok((buffer, validated))
        })
        .await
        .map_err(|e| ValidationError::Corrupt(format!("validation task failed: {e}")))?
    }

    /// Decode everything readable from `buffer` and rewind it.
    ///
    /// Header dimensions are checked against the pixel ceiling before the
    /// full decode is attempted.
    pub fn validate_sync<R: Read + Seek>(
        &self,
        buffer: &mut R,
    ) -> Result<ValidatedImage, ValidationError> {
        buffer.seek(SeekFrom::Start(0)).map_err(corrupt)?;
        let reader = ImageReader::new(BufReader::new(&mut *buffer))
            .with_guessed_format()
            .map_err(corrupt)?;
        let format = reader
            .format()
            .ok_or_else(|| ValidationError::Corrupt("unrecognized image format".to_string()))?;

        let mut reader = reader;
        reader.limits(self.limits());
        let (width, height) = reader.into_dimensions().map_err(classify)?;
        self.check_pixels(width, height)?;

        buffer.seek(SeekFrom::Start(0)).map_err(corrupt)?;
        let mut reader = ImageReader::with_format(BufReader::new(&mut *buffer), format);
        reader.limits(self.limits());
        let decoded = reader.decode().map_err(classify)?;
        self.check_pixels(decoded.width(), decoded.height())?;
        drop(decoded);

        buffer.seek(SeekFrom::Start(0)).map_err(corrupt)?;

        Ok(ValidatedImage {
            extension: canonical_extension(format),
            width,
            height,
        })
    }

    fn limits(&self) -> Limits {
        let max_dim = self.max_pixels.min(u32::MAX as u64) as u32;
        let mut limits = Limits::default();
        limits.max_image_width = Some(max_dim);
        limits.max_image_height = Some(max_dim);
        limits.max_alloc = Some(self.max_pixels.saturating_mul(8));
        limits
    }

    fn check_pixels(&self, width: u32, height: u32) -> Result<(), ValidationError> {
        let pixels = (width as u64).saturating_mul(height as u64);
        if pixels > self.max_pixels {
            return Err(ValidationError::DecompressionBomb(format!(
                "{width}x{height} exceeds {} pixels",
                self.max_pixels
            )));
        }
        Ok(())
    }
}

fn corrupt(e: impl std::fmt::Display) -> ValidationError {
    ValidationError::Corrupt(e.to_string())
}

fn classify(e: ImageError) -> ValidationError {
    match e {
        ImageError::Limits(limit) => ValidationError::DecompressionBomb(limit.to_string()),
        other => ValidationError::Corrupt(other.to_string()),
    }
}

/// Extension used when storing an image of `format`.
pub fn canonical_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Ico => "ico",
        other => other.extensions_str().first().copied().unwrap_or("bin"),
    }
}
