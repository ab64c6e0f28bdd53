// src/services/source.rs

//! Catalog document transport.
//!
//! Failures never propagate: a source that cannot deliver the document
//! yields an empty one, which groups into nothing and declines the gate.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;

use crate::utils::http;

/// Provider of the raw catalog text.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Read the full document; empty on any transport failure.
    async fn load(&self) -> String;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Document fetched with a single GET.
pub struct HttpDocumentSource {
    client: Client,
    url: String,
}

impl HttpDocumentSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn load(&self) -> String {
        match http::fetch_text(&self.client, &self.url).await {
            Ok(text) => {
                log::info!("Downloaded catalog from {} ({} bytes)", self.url, text.len());
                text
            }
            Err(e) => {
                log::error!("Unable to download catalog from {}: {}", self.url, e);
                String::new()
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Document read from the local filesystem.
pub struct FileDocumentSource {
    path: PathBuf,
}

impl FileDocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentSource for FileDocumentSource {
    async fn load(&self) -> String {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                log::error!("Unable to read catalog {}: {}", self.path.display(), e);
                String::new()
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory document.
pub struct StaticDocumentSource(pub String);

#[async_trait]
impl DocumentSource for StaticDocumentSource {
    async fn load(&self) -> String {
        self.0.clone()
    }

    fn describe(&self) -> String {
        "in-memory document".to_string()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::utils::http::test_support::{loopback_client, serve};

    #[tokio::test]
    async fn test_http_source_downloads() {
        let (url, _) = serve("/README.md", vec![(200, "## Section")]).await;
        let source = HttpDocumentSource::new(loopback_client(), url);
        assert_eq!(source.load().await, "## Section");
    }

    #[tokio::test]
    async fn test_http_source_failure_is_empty() {
        let (url, _) = serve("/README.md", vec![(404, "missing")]).await;
        let source = HttpDocumentSource::new(loopback_client(), url);
        assert!(source.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_source() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README.md");
        std::fs::write(&path, "## Local").unwrap();

        assert_eq!(FileDocumentSource::new(&path).load().await, "## Local");
        assert!(
            FileDocumentSource::new(tmp.path().join("nope.md"))
                .load()
                .await
                .is_empty()
        );
    }
}
