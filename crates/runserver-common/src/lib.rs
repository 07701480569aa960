// runserver-common: the harness core. Resolves the server runtime through a
// URL-keyed artifact cache, stages it with the freshly built plugin into a
// run directory, and supervises the server process with a console bridge.

pub mod artifact_cache;
pub mod artifact_fetcher;
pub mod config;
pub mod constants;
pub mod errors;
pub mod http_client_factory;
pub mod relay;
pub mod run_directory;
pub mod shutdown;
pub mod supervisor;
pub mod task;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use artifact_cache::{ArtifactCache, CacheKey};
pub use artifact_fetcher::{ArtifactFetcher, UrlFetcher};
pub use config::{HarnessConfig, HarnessConfigOverrides};
pub use errors::{ConfigError, DownloadError, MissingArtifactError, ProcessLaunchError};
pub use http_client_factory::HttpClientFactory;
pub use run_directory::{RunDirectory, RunDirectoryManager};
pub use shutdown::ShutdownHook;
pub use supervisor::{Console, LaunchOptions, ProcessSession, ServerProcessSupervisor, SessionState};
pub use task::{HarnessTask, RunServerTask, TaskInputs};
