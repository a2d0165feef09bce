//! Database query modules.
//!
//! - cached_images: the BBCode image cache, keyed by source URL
//! - text_records: raw/rendered BBCode fields on news items, posts and users

pub mod cached_images;
pub mod text_records;
