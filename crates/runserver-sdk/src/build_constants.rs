/// Harness package metadata, fixed at compile time.
#[derive(Debug, Clone)]
pub struct HarnessPackage;

impl HarnessPackage {
    /// The semantic version of the harness, taken from `Cargo.toml`.
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// The commit hash from which this binary was built.
    /// Set via the `RUNSERVER_COMMIT_HASH` env var at compile time, or "N/A".
    pub const COMMIT_HASH: &'static str = match option_env!("RUNSERVER_COMMIT_HASH") {
        Some(h) => h,
        None => "N/A",
    };

    /// `User-Agent` header sent with artifact downloads.
    pub fn user_agent() -> String {
        format!("runserver/{}", Self::VERSION)
    }
}
