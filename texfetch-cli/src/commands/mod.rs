//! CLI command implementations.
//!
//! - [`fetch`] - fetch and decode one image through the pipeline
//! - [`cache`] - disk cache statistics and clearing
//! - [`config`] - config file path, contents and initialization

pub mod cache;
pub mod config;
pub mod fetch;
