// src/error.rs

//! Unified error handling for the catalog sync.

use std::fmt;

use thiserror::Error;

/// Result type alias for catalog sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store connection could not be established
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Catalog document could not be read
    #[error("Source error: {0}")]
    Source(String),

    /// Metric lookup failed for a reference
    #[error("Metric error for {reference}: {message}")]
    Metric {
        reference: String,
        message: String,
        transient: bool,
    },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl fmt::Display) -> Self {
        Self::Connection(message.to_string())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a source error.
    pub fn source(message: impl fmt::Display) -> Self {
        Self::Source(message.to_string())
    }

    /// Create a permanent metric error for a reference.
    pub fn metric(reference: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Metric {
            reference: reference.into(),
            message: message.to_string(),
            transient: false,
        }
    }

    /// Create a metric error worth retrying (throttling, server or transport failure).
    pub fn metric_transient(reference: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Metric {
            reference: reference.into(),
            message: message.to_string(),
            transient: true,
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Metric { transient, .. } => *transient,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
