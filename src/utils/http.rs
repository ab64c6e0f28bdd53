// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(user_agent: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a URL as text, failing on non-success status.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(text)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned responses in order, one per connection.
    ///
    /// Returns `http://{addr}{path}` and a counter of accepted requests.
    pub async fn serve(
        path: &str,
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<AtomicUsize>) {
        let responses = responses
            .into_iter()
            .map(|(status, body)| (status, "", body))
            .collect();
        serve_with_headers(path, responses).await
    }

    /// Like [`serve`], with extra raw header lines (`name: value\r\n`) per response.
    pub async fn serve_with_headers(
        path: &str,
        responses: Vec<(u16, &'static str, &'static str)>,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for (status, headers, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\n{headers}content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}{path}"), hits)
    }

    /// Client that ignores proxy settings from the environment.
    pub fn loopback_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{loopback_client, serve};
    use super::*;

    #[test]
    fn test_create_async_client() {
        assert!(create_async_client("catalog-sync/test", 5).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_text_rejects_error_status() {
        let (url, _) = serve("/README.md", vec![(500, "oops")]).await;
        assert!(fetch_text(&loopback_client(), &url).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_text_returns_body() {
        let (url, _) = serve("/README.md", vec![(200, "## Title")]).await;
        let text = fetch_text(&loopback_client(), &url).await.unwrap();
        assert_eq!(text, "## Title");
    }
}
