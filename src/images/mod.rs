//! Remote image mirroring.
//!
//! Images referenced from BBCode are fetched under size and type limits,
//! validated by a full bounded decode, and stored locally under the media
//! root with one database row per source URL. Size variants are derived from
//! the stored original on demand.

mod error;
mod fetcher;
mod store;
mod validator;
mod variants;

pub use error::{FetchError, StoreError, ValidationError};
pub use fetcher::{FetchedImage, ImageFetcher};
pub use store::{ImageCacheStore, UpsertOutcome};
pub use validator::{canonical_extension, ImageValidator, ValidatedImage};
pub use variants::{
    asset_url, compute_hash, content_type_for, ensure_variant, image_dir, ImageSize, BBCODE_DIR,
};
