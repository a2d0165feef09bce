//! Agora - forum BBCode post-processing
//!
//! This library crate exposes the core functionality for integration testing.

pub mod bbcode;
pub mod config;
pub mod images;
pub mod maintenance;
pub mod postprocess;
pub mod records;
pub mod server;
