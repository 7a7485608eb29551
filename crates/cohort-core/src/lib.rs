//! Core types, bucketing and engine components for the Cohort experiment
//! service.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`store::ExperimentStore`]; the engine components in
//! [`registry`], [`engine`], [`recorder`] and [`analytics`] receive a store
//! handle explicitly and never reach for global state.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analytics;
pub mod assignment;
pub mod bucket;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod memory;
pub mod recorder;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
