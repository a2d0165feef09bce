//! agora-core: shared types, IDs, and errors.
//!
//! This crate is the foundational dependency for the other agora crates:
//!
//! - **Typed IDs**: UUID newtypes for cached images and text-bearing records
//! - **Record kinds**: the closed set of record types that own BBCode fields
//! - **Error handling**: a unified error type and result alias
//!
//! # Examples
//!
//! ```
//! use agora_core::{Error, RecordId, RecordKind, Result};
//!
//! let id = RecordId::new();
//! let kind: RecordKind = "forumpost".parse().unwrap();
//! assert_eq!(kind.field_name(), "message");
//!
//! fn lookup(id: RecordId) -> Result<()> {
//!     Err(Error::not_found("record", id))
//! }
//! assert!(lookup(id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod records;

pub use error::{Error, Result};
pub use ids::*;
pub use records::*;
