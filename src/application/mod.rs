//! Application services: the cached repository and its storage contract.

pub mod error;
pub mod pagination;
pub mod repos;
pub mod repository;
