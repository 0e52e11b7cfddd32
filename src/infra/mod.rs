//! Infrastructure adapters and runtime bootstrap.

pub mod cache;
pub mod db;
pub mod error;
pub mod memory;
pub mod redis;
pub mod telemetry;
