use crate::downloader::TrackSource;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Streaming HTTP transport for track downloads. One attempt per call:
/// failed tasks are retried manually by the user, never by the transport.
pub struct HttpTrackSource {
    client: Client,
}

impl HttpTrackSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .gzip(true)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TrackSource for HttpTrackSource {
    async fn fetch(
        &self,
        url: &str,
        sink: &mut (dyn tokio::io::AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .header("Accept", "audio/*,*/*;q=0.9")
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Request to {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(format!("{} returned 404", url)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Auth(format!(
                    "{} rejected the download with {}",
                    url,
                    response.status()
                )))
            }
            status if !status.is_success() => {
                return Err(AppError::Network(format!("{} returned {}", url, status)))
            }
            _ => {}
        }

        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Network(format!("Stream from {} broke: {}", url, e)))?;
            sink.write_all(&chunk)
                .await
                .map_err(|e| AppError::Filesystem(format!("Write failed: {}", e)))?;
            written += chunk.len() as u64;
        }

        sink.flush()
            .await
            .map_err(|e| AppError::Filesystem(format!("Flush failed: {}", e)))?;

        Ok(written)
    }
}
