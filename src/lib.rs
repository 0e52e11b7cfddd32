//! Repository layer with tag-based query result caching.
//!
//! Reads made through [`application::repository::Repository`] are cached
//! under content-derived keys and tagged; writes flush the tags they affect,
//! and every request flushes the entries it produced when it ends.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
