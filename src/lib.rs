// src/lib.rs

//! Catalog sync library
//!
//! Groups a curated link catalog by heading, enriches every entry with a
//! star count and merges the result into a document store.

pub mod config;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
