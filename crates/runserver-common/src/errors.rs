// Fatal error kinds of a harness invocation. Operations return
// `anyhow::Result`; callers recover the kind with `downcast_ref`.

use std::path::PathBuf;

/// Boxed cause carried by [`DownloadError`].
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fetching the runtime artifact failed. The cache is left untouched.
#[derive(Debug, thiserror::Error)]
#[error("Failed to download '{url}': {source}")]
pub struct DownloadError {
    pub url: String,
    #[source]
    pub source: BoxedCause,
}

impl DownloadError {
    pub fn new(url: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// The server answered a download request with a non-success status.
#[derive(Debug, thiserror::Error)]
#[error("server responded with HTTP {status}")]
pub struct HttpStatusError {
    pub status: u16,
}

/// The build artifact to install does not exist, so there is nothing to test.
#[derive(Debug, thiserror::Error)]
#[error("Build artifact '{}' does not exist; build the plugin before running the server", .path.display())]
pub struct MissingArtifactError {
    pub path: PathBuf,
}

/// The OS refused to spawn the server process.
#[derive(Debug, thiserror::Error)]
#[error("Failed to start '{program}' with arguments '{arguments}': {source}")]
pub struct ProcessLaunchError {
    pub program: String,
    pub arguments: String,
    #[source]
    pub source: std::io::Error,
}

/// The harness configuration is missing a value or holds an invalid one.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting '{0}'")]
    Missing(&'static str),
    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
