//! Size variants of cached images and content hashing.
//!
//! Originals live at `{media_dir}/bbcode/{id}/{file_name}`; derived sizes are
//! written lazily to `{media_dir}/bbcode/{id}/variants/{size}.{ext}` the first
//! time they are requested.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use agora_core::CachedImageId;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};

/// Directory under the media root that holds mirrored BBCode images.
pub const BBCODE_DIR: &str = "bbcode";

const VARIANTS_DIR: &str = "variants";

/// Size variant for served images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSize {
    /// Original resolution.
    Original,
    /// Medium variant (800px width).
    Medium,
    /// Small variant (200px width).
    Small,
}

impl ImageSize {
    /// Returns the target width in pixels for this size variant, or `None` for original.
    pub fn target_width(&self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::Medium => Some(800),
            Self::Small => Some(200),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Medium => "medium",
            Self::Small => "small",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "medium" => Ok(Self::Medium),
            "small" => Ok(Self::Small),
            _ => Err(format!("Invalid image size: {}", s)),
        }
    }
}

/// Public URL of a cached image at the given size.
pub fn asset_url(id: CachedImageId, size: ImageSize) -> String {
    format!("/media/{BBCODE_DIR}/{id}/{size}")
}

/// Directory holding the original and variants of one cached image.
pub fn image_dir(media_dir: &Path, id: CachedImageId) -> PathBuf {
    media_dir.join(BBCODE_DIR).join(id.to_string())
}

/// Compute the content hash for image data.
///
/// Returns the first 16 hex characters of the SHA-256 digest.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    hex::encode(&digest[..8]) // 8 bytes = 16 hex chars
}

/// [`compute_hash`] over everything readable from `reader`.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

/// Remove every derived variant of the image in `dir`.
pub fn remove_variants(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir.join(VARIANTS_DIR)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Path of the file to serve for `original` at `size`, generating it if needed.
///
/// Images already narrower than the target width are never upscaled; the
/// original is served instead. JPEG sources produce JPEG variants, anything
/// else is re-encoded as PNG.
pub fn ensure_variant(original: &Path, size: ImageSize) -> Result<PathBuf> {
    let Some(target_width) = size.target_width() else {
        return Ok(original.to_path_buf());
    };

    let reader = ImageReader::open(original)
        .and_then(|r| r.with_guessed_format())
        .with_context(|| format!("Failed to open image: {}", original.display()))?;
    let is_jpeg = reader.format() == Some(ImageFormat::Jpeg);
    let ext = if is_jpeg { "jpg" } else { "png" };

    let dir = original
        .parent()
        .context("Cached image has no parent directory")?
        .join(VARIANTS_DIR);
    let variant = dir.join(format!("{size}.{ext}"));
    if variant.exists() {
        return Ok(variant);
    }

    let (width, _) = reader
        .into_dimensions()
        .with_context(|| format!("Failed to read image header: {}", original.display()))?;
    if width <= target_width {
        return Ok(original.to_path_buf());
    }

    let img = ImageReader::open(original)
        .and_then(|r| r.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|r| r.decode())
        .with_context(|| format!("Failed to decode image: {}", original.display()))?;
    let resized = img.resize(target_width, u32::MAX, FilterType::Lanczos3);

    let mut buf = Cursor::new(Vec::new());
    if is_jpeg {
        image::DynamicImage::ImageRgb8(resized.to_rgb8())
            .write_to(&mut buf, ImageFormat::Jpeg)
            .context("Failed to encode resized image as JPEG")?;
    } else {
        resized
            .write_to(&mut buf, ImageFormat::Png)
            .context("Failed to encode resized image as PNG")?;
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create variant directory: {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    io::Write::write_all(&mut tmp, &buf.into_inner())?;
    tmp.persist(&variant)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write image file: {}", variant.display()))?;

    Ok(variant)
}

/// `Content-Type` for a stored file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "jpe" | "jfif") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([255, 0, 0]));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_compute_hash_length() {
        let hash = compute_hash(b"test data");
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn test_compute_hash_different_data() {
        assert_ne!(compute_hash(b"data1"), compute_hash(b"data2"));
    }

    #[test]
    fn test_hash_reader_matches_compute_hash() {
        let data = b"same data".to_vec();
        assert_eq!(
            hash_reader(&mut Cursor::new(data.clone())).unwrap(),
            compute_hash(&data)
        );
    }

    #[test]
    fn test_image_size_target_widths() {
        assert_eq!(ImageSize::Original.target_width(), None);
        assert_eq!(ImageSize::Medium.target_width(), Some(800));
        assert_eq!(ImageSize::Small.target_width(), Some(200));
    }

    #[test]
    fn test_image_size_parse() {
        assert_eq!("Medium".parse::<ImageSize>().unwrap(), ImageSize::Medium);
        assert_eq!("small".parse::<ImageSize>().unwrap(), ImageSize::Small);
        assert!("large".parse::<ImageSize>().is_err());
    }

    #[test]
    fn test_asset_url() {
        let id = CachedImageId::new();
        assert_eq!(
            asset_url(id, ImageSize::Medium),
            format!("/media/bbcode/{id}/medium")
        );
    }

    #[test]
    fn test_original_is_served_as_is() {
        let path = Path::new("/data/bbcode/x/a.png");
        assert_eq!(ensure_variant(path, ImageSize::Original).unwrap(), path);
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.png");
        write_png(&original, 100, 100);

        assert_eq!(ensure_variant(&original, ImageSize::Small).unwrap(), original);
        assert_eq!(ensure_variant(&original, ImageSize::Medium).unwrap(), original);
        assert!(!dir.path().join("variants").exists());
    }

    #[test]
    fn test_variant_generated_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("wide.png");
        write_png(&original, 400, 100);

        let variant = ensure_variant(&original, ImageSize::Small).unwrap();
        assert_eq!(variant, dir.path().join("variants").join("small.png"));
        let (w, h) = image::image_dimensions(&variant).unwrap();
        assert_eq!((w, h), (200, 50));

        // Second call reuses the file on disk.
        assert_eq!(ensure_variant(&original, ImageSize::Small).unwrap(), variant);

        remove_variants(dir.path()).unwrap();
        assert!(!variant.exists());
        assert!(original.exists());
        remove_variants(dir.path()).unwrap();
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
