//! agora-db: database schema, migrations, and query operations.
//!
//! SQLite via rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the database schema
//! - `queries` - Query operations for cached images and text-bearing records
//!
//! # Example
//!
//! ```
//! use agora_core::RecordKind;
//! use agora_db::pool::{get_conn, init_memory_pool};
//! use agora_db::queries::text_records;
//!
//! let pool = init_memory_pool().unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let post = text_records::insert_record(&conn, RecordKind::ForumPost, "hello", "hello").unwrap();
//! assert_eq!(post.raw, "hello");
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
