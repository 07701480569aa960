// ArtifactFetcher: streams the bytes behind an artifact URL into a sink.
// The cache owns where those bytes land; fetchers only know how to read them.

use crate::errors::{BoxedCause, HttpStatusError};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

/// The URL uses a scheme no fetcher understands.
#[derive(Debug, thiserror::Error)]
#[error("unsupported URL scheme '{0}'")]
pub struct UnsupportedSchemeError(pub String);

/// A `file:` URL that does not map to a local path.
#[derive(Debug, thiserror::Error)]
#[error("'{0}' does not name a local file")]
pub struct InvalidFileUrlError(pub String);

/// Source of artifact bytes.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Write the full content of `url` into `sink` and flush it.
    ///
    /// Returns the number of bytes written. On error the sink may hold a
    /// partial body; discarding it is the caller's job.
    async fn fetch(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, BoxedCause>;
}

/// Fetches `http`, `https` and `file` URLs.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    client: Client,
}

impl UrlFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_http(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, BoxedCause> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpStatusError {
                status: status.as_u16(),
            }
            .into());
        }

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    async fn fetch_file(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, BoxedCause> {
        let path = url
            .to_file_path()
            .map_err(|()| InvalidFileUrlError(url.to_string()))?;
        let mut source = tokio::fs::File::open(&path).await?;
        let written = tokio::io::copy(&mut source, &mut *sink).await?;
        sink.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactFetcher for UrlFetcher {
    async fn fetch(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, BoxedCause> {
        match url.scheme() {
            "http" | "https" => self.fetch_http(url, sink).await,
            "file" => self.fetch_file(url, sink).await,
            other => Err(UnsupportedSchemeError(other.to_string()).into()),
        }
    }
}
