// ArtifactCache: URL-keyed, durable store of downloaded server runtimes.
//
// Layout: `<root>/<sha256-hex-of-url>.<ext>`, one file per distinct URL
// string. Downloads stream into a hidden temp file inside the root and are
// renamed into place, so an entry is either absent or complete. Entries are
// never evicted. Content changes behind an unchanged URL are not detected.

use crate::artifact_fetcher::ArtifactFetcher;
use crate::constants::DOWNLOAD_TEMP_PREFIX;
use crate::errors::{ConfigError, DownloadError};

use anyhow::Result;
use runserver_sdk::{IOUtil, TraceWriter, UrlUtil};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lower-case hex SHA-256 of the URL string as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_url(url: &str) -> Self {
        Self(hex::encode(Sha256::digest(url.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves artifact URLs to local files, downloading on a miss.
pub struct ArtifactCache {
    root: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    trace: Arc<dyn TraceWriter>,
}

impl ArtifactCache {
    pub fn new(
        root: impl Into<PathBuf>,
        fetcher: Arc<dyn ArtifactFetcher>,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        Self {
            root: root.into(),
            fetcher,
            trace,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the entry for `url` lives, whether or not it exists yet.
    pub fn cached_path(&self, url: &str) -> Result<PathBuf> {
        let parsed = UrlUtil::parse_absolute(url)
            .map_err(|reason| ConfigError::Invalid { key: "url", reason })?;
        Ok(self.entry_path(url, &UrlUtil::file_extension(&parsed)))
    }

    /// Return the cached file for `url`, downloading it first on a miss.
    ///
    /// A hit never touches the network. On a failed download the temp file
    /// is removed and a [`DownloadError`] is returned; no entry appears.
    pub async fn resolve(&self, url: &str) -> Result<PathBuf> {
        let parsed = UrlUtil::parse_absolute(url)
            .map_err(|reason| ConfigError::Invalid { key: "url", reason })?;
        let key = CacheKey::for_url(url);
        let dest = self.entry_path(url, &UrlUtil::file_extension(&parsed));

        if dest.is_file() {
            self.trace
                .info(&format!("Using cached server runtime '{}'", dest.display()));
            return Ok(dest);
        }

        self.trace.info(&format!(
            "Downloading server runtime from {}",
            UrlUtil::redact(&parsed)
        ));
        self.trace.verbose(&format!("Cache key {key} -> '{}'", dest.display()));

        IOUtil::ensure_directory(&self.root).map_err(|e| DownloadError::new(url, e))?;

        let temp = tempfile::Builder::new()
            .prefix(DOWNLOAD_TEMP_PREFIX)
            .suffix(".part")
            .tempfile_in(&self.root)
            .map_err(|e| DownloadError::new(url, e))?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let written = match self.fetcher.fetch(&parsed, &mut file).await {
            Ok(written) => written,
            Err(cause) => {
                // Close before deleting; dropping the TempPath removes the file.
                drop(file);
                drop(temp_path);
                self.trace.error("Failed to download server runtime");
                return Err(DownloadError::new(url, cause).into());
            }
        };

        if let Err(e) = file.sync_all().await {
            drop(file);
            drop(temp_path);
            return Err(DownloadError::new(url, e).into());
        }
        drop(file);

        // Last writer wins when two invocations race on the same URL; both
        // wrote the same bytes.
        temp_path
            .persist(&dest)
            .map_err(|e| DownloadError::new(url, e.error))?;

        self.trace.info(&format!(
            "Server runtime downloaded and cached ({written} bytes)"
        ));
        Ok(dest)
    }

    fn entry_path(&self, url: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}.{extension}", CacheKey::for_url(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_fetcher::tests::{serve_once, test_fetcher};
    use crate::errors::BoxedCause;
    use async_trait::async_trait;
    use runserver_sdk::trace::{CollectingTraceWriter, TraceLevel};
    use runserver_sdk::NullTraceWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncWrite, AsyncWriteExt};
    use url::Url;

    const URL: &str = "https://example.test/runtime.bin";
    const URL_DIGEST: &str = "d90129d69cba24eb17b1f91254b1db9ac3f46f8e972c26079e9647685226cee5";

    /// Serves a fixed body and counts calls.
    struct CountingFetcher {
        calls: AtomicUsize,
        body: Vec<u8>,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(body: &[u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                body: body.to_vec(),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(
            &self,
            _url: &Url,
            sink: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, BoxedCause> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (head, tail) = self.body.split_at(self.body.len() / 2);
            sink.write_all(head).await?;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            sink.write_all(tail).await?;
            sink.flush().await?;
            Ok(self.body.len() as u64)
        }
    }

    /// Writes part of a body, then fails like a dropped connection.
    struct FailingFetcher;

    #[async_trait]
    impl ArtifactFetcher for FailingFetcher {
        async fn fetch(
            &self,
            _url: &Url,
            sink: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, BoxedCause> {
            sink.write_all(b"partial-jar-bytes").await?;
            sink.flush().await?;
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset").into())
        }
    }

    fn cache_with(root: &Path, fetcher: Arc<dyn ArtifactFetcher>) -> ArtifactCache {
        ArtifactCache::new(root, fetcher, Arc::new(NullTraceWriter))
    }

    #[test]
    fn key_is_sha256_of_url_string() {
        assert_eq!(CacheKey::for_url(URL).as_str(), URL_DIGEST);
        assert_eq!(CacheKey::for_url(URL), CacheKey::for_url(URL));
        // No normalisation: a different spelling is a different entry.
        assert_ne!(
            CacheKey::for_url(URL),
            CacheKey::for_url("https://EXAMPLE.test/runtime.bin")
        );
    }

    #[test]
    fn cached_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), Arc::new(CountingFetcher::new(b"")));
        assert_eq!(
            cache.cached_path(URL).unwrap(),
            dir.path().join(format!("{URL_DIGEST}.bin"))
        );
        let jar = cache
            .cached_path("https://example.test/paper-1.21.10-115.jar")
            .unwrap();
        assert_eq!(jar.extension().unwrap(), "jar");
    }

    #[tokio::test]
    async fn second_resolve_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("runserver-cache");
        let fetcher = Arc::new(CountingFetcher::new(b"server runtime v1"));
        let cache = cache_with(&root, fetcher.clone());

        let first = cache.resolve(URL).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first, root.join(format!("{URL_DIGEST}.bin")));
        assert_eq!(std::fs::read(&first).unwrap(), b"server runtime v1");

        let second = cache.resolve(URL).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(
            IOUtil::list_file_names(&root).unwrap(),
            vec![format!("{URL_DIGEST}.bin")]
        );
    }

    #[tokio::test]
    async fn existing_entry_is_reused_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = dir.path().join(format!("{URL_DIGEST}.bin"));
        std::fs::write(&seeded, b"from an earlier run").unwrap();

        let fetcher = Arc::new(CountingFetcher::new(b"never fetched"));
        let trace = Arc::new(CollectingTraceWriter::new());
        let cache = ArtifactCache::new(dir.path(), fetcher.clone(), trace.clone());

        assert_eq!(cache.resolve(URL).await.unwrap(), seeded);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(std::fs::read(&seeded).unwrap(), b"from an earlier run");
        assert!(trace.contains(TraceLevel::Info, "Using cached server runtime"));
    }

    #[tokio::test]
    async fn failed_download_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other-entry.jar"), b"keep me").unwrap();
        let before = IOUtil::list_file_names(dir.path()).unwrap();

        let cache = cache_with(dir.path(), Arc::new(FailingFetcher));
        let err = cache.resolve(URL).await.unwrap_err();

        let download = err.downcast_ref::<DownloadError>().unwrap();
        assert_eq!(download.url, URL);
        assert!(download.to_string().contains("connection reset"));
        assert_eq!(IOUtil::list_file_names(dir.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn failure_then_success_downloads_again() {
        let dir = tempfile::tempdir().unwrap();
        let failing = cache_with(dir.path(), Arc::new(FailingFetcher));
        assert!(failing.resolve(URL).await.is_err());

        let fetcher = Arc::new(CountingFetcher::new(b"good bytes"));
        let cache = cache_with(dir.path(), fetcher.clone());
        let path = cache.resolve(URL).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(std::fs::read(path).unwrap(), b"good bytes");
    }

    #[tokio::test]
    async fn concurrent_first_downloads_converge() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = CountingFetcher::new(b"identical content from either racer");
        fetcher.delay = Duration::from_millis(50);
        let cache = cache_with(dir.path(), Arc::new(fetcher));

        let (a, b) = tokio::join!(cache.resolve(URL), cache.resolve(URL));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_eq!(
            std::fs::read(&a).unwrap(),
            b"identical content from either racer"
        );
        assert_eq!(
            IOUtil::list_file_names(dir.path()).unwrap(),
            vec![format!("{URL_DIGEST}.bin")]
        );
    }

    #[tokio::test]
    async fn distinct_urls_get_distinct_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(b"x"));
        let cache = cache_with(dir.path(), fetcher.clone());
        let a = cache.resolve("https://example.test/a.jar").await.unwrap();
        let b = cache.resolve("https://example.test/b.jar").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn truncated_http_download_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("HTTP/1.1 200 OK", b"half a jar".to_vec(), Some(8192)).await;
        let cache = cache_with(dir.path(), Arc::new(test_fetcher()));

        let err = cache.resolve(url.as_str()).await.unwrap_err();
        server.await.unwrap();
        assert!(err.downcast_ref::<DownloadError>().is_some());
        assert!(IOUtil::list_file_names(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_download_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("HTTP/1.1 200 OK", b"real jar".to_vec(), None).await;
        let cache = cache_with(dir.path(), Arc::new(test_fetcher()));

        let path = cache.resolve(url.as_str()).await.unwrap();
        server.await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"real jar");

        // The one-shot server is gone; only a cache hit can succeed now.
        assert_eq!(cache.resolve(url.as_str()).await.unwrap(), path);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(b""));
        let cache = cache_with(dir.path(), fetcher.clone());
        let err = cache.resolve("not a url").await.unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert_eq!(fetcher.calls(), 0);
    }
}
