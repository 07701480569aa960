// Harness configuration. Settings are gathered in layers (config file,
// environment, command line) as `HarnessConfigOverrides`, merged, and turned
// into a validated `HarnessConfig` exactly once. The result is never mutated;
// components borrow it.

use crate::constants::{defaults, env_vars};
use crate::errors::ConfigError;

use runserver_sdk::{IOUtil, StringUtil, UrlUtil};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

// ---------------------------------------------------------------------------
// HarnessConfigOverrides
// ---------------------------------------------------------------------------

/// One layer of optional settings. Also the on-disk shape of `runserver.json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HarnessConfigOverrides {
    /// Where to download the server runtime from.
    pub url: Option<String>,
    /// Launch the runtime with the debug agent attached.
    pub debug: Option<bool>,
    /// The built plugin artifact to install.
    pub plugin: Option<PathBuf>,
    /// Base directory for the relative paths below.
    pub project_dir: Option<PathBuf>,
    pub run_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// File name the runtime is staged under inside the run directory.
    pub runtime_file_name: Option<String>,
    /// Java executable used to start the runtime.
    pub java: Option<String>,
    /// Extra JVM arguments placed before the debug flag.
    pub jvm_args: Option<Vec<String>>,
}

impl HarnessConfigOverrides {
    /// Load a layer from a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given (it must exist), otherwise
    /// `<project_dir>/runserver.json` when present, otherwise an empty layer.
    pub fn discover(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let candidate = project_dir.join(defaults::CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Build a layer from environment variables, read through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(env_vars::URL).filter(|v| !v.trim().is_empty());
        let debug = match lookup(env_vars::DEBUG) {
            Some(raw) if !raw.trim().is_empty() => Some(
                StringUtil::convert_to_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                    key: env_vars::DEBUG,
                    reason: format!("'{raw}' is not a boolean"),
                })?,
            ),
            _ => None,
        };
        Ok(Self {
            url,
            debug,
            ..Self::default()
        })
    }

    /// Build a layer from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Merge two layers; values set in `higher` win.
    pub fn merge(self, higher: Self) -> Self {
        Self {
            url: higher.url.or(self.url),
            debug: higher.debug.or(self.debug),
            plugin: higher.plugin.or(self.plugin),
            project_dir: higher.project_dir.or(self.project_dir),
            run_dir: higher.run_dir.or(self.run_dir),
            cache_dir: higher.cache_dir.or(self.cache_dir),
            runtime_file_name: higher.runtime_file_name.or(self.runtime_file_name),
            java: higher.java.or(self.java),
            jvm_args: higher.jvm_args.or(self.jvm_args),
        }
    }
}

// ---------------------------------------------------------------------------
// HarnessConfig
// ---------------------------------------------------------------------------

/// Validated, immutable harness configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    url: String,
    parsed_url: Url,
    debug: bool,
    plugin: PathBuf,
    project_dir: PathBuf,
    run_dir: PathBuf,
    cache_dir: PathBuf,
    runtime_file_name: String,
    java: String,
    jvm_args: Vec<String>,
}

impl HarnessConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(url: &str, plugin: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::from_overrides(HarnessConfigOverrides {
            url: Some(url.to_string()),
            plugin: Some(plugin.into()),
            ..HarnessConfigOverrides::default()
        })
    }

    /// Apply defaults to a merged layer and validate it.
    pub fn from_overrides(layer: HarnessConfigOverrides) -> Result<Self, ConfigError> {
        let url = layer.url.ok_or(ConfigError::Missing("url"))?;
        let parsed_url = UrlUtil::parse_absolute(&url)
            .map_err(|reason| ConfigError::Invalid { key: "url", reason })?;

        let plugin = layer.plugin.ok_or(ConfigError::Missing("plugin"))?;

        let runtime_file_name = layer
            .runtime_file_name
            .unwrap_or_else(|| defaults::RUNTIME_FILE_NAME.to_string());
        validate_file_name(&runtime_file_name)?;

        let java = layer.java.unwrap_or_else(|| defaults::JAVA.to_string());
        if java.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "java",
                reason: "must not be empty".to_string(),
            });
        }

        let project_dir = layer
            .project_dir
            .unwrap_or_else(|| PathBuf::from(defaults::PROJECT_DIR));
        let run_dir = layer.run_dir.unwrap_or_else(|| PathBuf::from(defaults::RUN_DIR));
        let cache_dir = layer
            .cache_dir
            .unwrap_or_else(|| PathBuf::from(defaults::CACHE_DIR));

        Ok(Self {
            // The cache key hashes this string as written, so keep it verbatim.
            url,
            parsed_url,
            debug: layer.debug.unwrap_or(false),
            plugin: IOUtil::resolve_against(&project_dir, &plugin),
            run_dir: IOUtil::resolve_against(&project_dir, &run_dir),
            cache_dir: IOUtil::resolve_against(&project_dir, &cache_dir),
            project_dir,
            runtime_file_name,
            java,
            jvm_args: layer.jvm_args.unwrap_or_default(),
        })
    }

    /// The artifact URL exactly as configured.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parsed_url(&self) -> &Url {
        &self.parsed_url
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Built plugin artifact, resolved against the project directory.
    pub fn plugin_path(&self) -> &Path {
        &self.plugin
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn runtime_file_name(&self) -> &str {
        &self.runtime_file_name
    }

    pub fn java(&self) -> &str {
        &self.java
    }

    pub fn jvm_args(&self) -> &[String] {
        &self.jvm_args
    }
}

fn validate_file_name(name: &str) -> Result<(), ConfigError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(ConfigError::Invalid {
            key: "runtimeFileName",
            reason: format!("'{name}' is not a plain file name"),
        });
    }
    Ok(())
}
