// RunDirectoryManager: stages the server runtime and the freshly built
// plugin into the run directory the server is started from.
//
// Layout: `<root>/<runtime-file-name>`, `<root>/plugins/<plugin-file-name>`.
// The directory persists between runs (server worlds and configs live there);
// only the two staged artifacts are replaced.

use crate::constants::PLUGINS_DIR_NAME;
use crate::errors::MissingArtifactError;

use anyhow::{Context, Result};
use runserver_sdk::{IOUtil, TraceWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A prepared run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub root: PathBuf,
    pub plugins_dir: PathBuf,
    /// Where the runtime is staged; may not exist until installed.
    pub runtime_path: PathBuf,
}

pub struct RunDirectoryManager {
    root: PathBuf,
    runtime_file_name: String,
    trace: Arc<dyn TraceWriter>,
}

impl RunDirectoryManager {
    pub fn new(
        root: impl Into<PathBuf>,
        runtime_file_name: impl Into<String>,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        Self {
            root: root.into(),
            runtime_file_name: runtime_file_name.into(),
            trace,
        }
    }

    /// Ensure the root and its plugins directory exist. Safe to repeat.
    pub fn prepare(&self) -> Result<RunDirectory> {
        let plugins_dir = self.root.join(PLUGINS_DIR_NAME);
        IOUtil::ensure_directory(&plugins_dir).context("Failed to prepare run directory")?;
        self.trace
            .verbose(&format!("Run directory ready at '{}'", self.root.display()));

        Ok(RunDirectory {
            root: self.root.clone(),
            plugins_dir,
            runtime_path: self.root.join(&self.runtime_file_name),
        })
    }

    /// Copy the cached runtime to `<root>/<dest_name>`, replacing any copy
    /// left by an earlier run.
    pub fn install_runtime(&self, cached_path: &Path, dest_name: &str) -> Result<PathBuf> {
        let dest = self.root.join(dest_name);
        IOUtil::copy_file_overwrite(cached_path, &dest)
            .context("Failed to stage server runtime")?;
        self.trace
            .verbose(&format!("Server runtime staged at '{}'", dest.display()));
        Ok(dest)
    }

    /// Copy the built plugin into `plugins_dir`, keeping its file name.
    ///
    /// Fails with [`MissingArtifactError`] when `built_artifact` is not an
    /// existing regular file.
    pub fn install_plugin(&self, built_artifact: &Path, plugins_dir: &Path) -> Result<PathBuf> {
        let file_name = match built_artifact.file_name() {
            Some(name) if IOUtil::is_regular_file(built_artifact) => name,
            _ => {
                return Err(MissingArtifactError {
                    path: built_artifact.to_path_buf(),
                }
                .into())
            }
        };

        let dest = plugins_dir.join(file_name);
        IOUtil::copy_file_overwrite(built_artifact, &dest)
            .context("Failed to install plugin")?;
        self.trace
            .info(&format!("Plugin copied to: {}", dest.display()));
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runserver_sdk::NullTraceWriter;
    use std::fs;

    fn manager(root: &Path) -> RunDirectoryManager {
        RunDirectoryManager::new(root, "server.jar", Arc::new(NullTraceWriter))
    }

    fn snapshot(root: &Path) -> Vec<String> {
        let mut entries = vec![];
        for name in IOUtil::list_file_names(root).unwrap() {
            let path = root.join(&name);
            entries.push(name.clone());
            if path.is_dir() {
                for child in snapshot(&path) {
                    entries.push(format!("{name}/{child}"));
                }
            }
        }
        entries
    }

    #[test]
    fn prepare_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        let run = manager(&root).prepare().unwrap();

        assert_eq!(run.root, root);
        assert_eq!(run.plugins_dir, root.join("plugins"));
        assert_eq!(run.runtime_path, root.join("server.jar"));
        assert!(run.plugins_dir.is_dir());
        assert!(!run.runtime_path.exists());
    }

    #[test]
    fn prepare_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        let mgr = manager(&root);

        let first = mgr.prepare().unwrap();
        let after_one = snapshot(&root);
        for _ in 0..3 {
            assert_eq!(mgr.prepare().unwrap(), first);
        }
        assert_eq!(snapshot(&root), after_one);
        assert_eq!(after_one, vec!["plugins"]);
    }

    #[test]
    fn prepare_keeps_existing_server_state() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        fs::create_dir_all(root.join("world")).unwrap();
        fs::write(root.join("world").join("level.dat"), b"save").unwrap();

        manager(&root).prepare().unwrap();
        assert_eq!(fs::read(root.join("world").join("level.dat")).unwrap(), b"save");
    }

    #[test]
    fn install_runtime_overwrites_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        let mgr = manager(&root);
        mgr.prepare().unwrap();
        fs::write(root.join("server.jar"), b"old runtime").unwrap();

        let cached = dir.path().join("cached.jar");
        fs::write(&cached, b"new runtime").unwrap();
        let staged = mgr.install_runtime(&cached, "server.jar").unwrap();

        assert_eq!(staged, root.join("server.jar"));
        assert_eq!(fs::read(&staged).unwrap(), b"new runtime");
        assert_eq!(fs::read(&cached).unwrap(), b"new runtime");
    }

    #[test]
    fn install_plugin_copies_bytes_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir.path().join("run"));
        let run = mgr.prepare().unwrap();

        let built = dir.path().join("libs").join("EliteEssentials-1.1.0.jar");
        fs::create_dir_all(built.parent().unwrap()).unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(&built, &payload).unwrap();

        let installed = mgr.install_plugin(&built, &run.plugins_dir).unwrap();
        assert_eq!(installed, run.plugins_dir.join("EliteEssentials-1.1.0.jar"));
        assert_eq!(fs::read(&installed).unwrap(), payload);
    }

    #[test]
    fn install_plugin_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir.path().join("run"));
        let run = mgr.prepare().unwrap();

        let missing = dir.path().join("libs").join("plugin.jar");
        let err = mgr.install_plugin(&missing, &run.plugins_dir).unwrap_err();
        let missing_err = err.downcast_ref::<MissingArtifactError>().unwrap();
        assert_eq!(missing_err.path, missing);
        assert!(IOUtil::list_file_names(&run.plugins_dir).unwrap().is_empty());
    }

    #[test]
    fn install_plugin_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir.path().join("run"));
        let run = mgr.prepare().unwrap();

        let err = mgr.install_plugin(dir.path(), &run.plugins_dir).unwrap_err();
        assert!(err.downcast_ref::<MissingArtifactError>().is_some());
    }
}
