//! HTTP client and client-side assignment cache for the Cohort API.

pub mod cache;
pub mod client;

pub use cache::{AssignmentSource, CacheConfig, CachedAssigner};
pub use client::{ApiClient, ApiConfig};
