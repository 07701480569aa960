use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File-system helpers used when staging artifacts.
pub struct IOUtil;

impl IOUtil {
    /// Create `path` and any missing parents. Succeeds if it already exists.
    pub fn ensure_directory(path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory '{}'", path.display()))
    }

    /// Copy `source` to `dest`, replacing any existing file at `dest`.
    ///
    /// Returns the number of bytes copied.
    pub fn copy_file_overwrite(source: &Path, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            Self::ensure_directory(parent)?;
        }

        // A read-only leftover from an earlier run would make fs::copy fail.
        if dest.exists() {
            Self::delete_file(dest)?;
        }

        fs::copy(source, dest).with_context(|| {
            format!(
                "Failed to copy '{}' to '{}'",
                source.display(),
                dest.display()
            )
        })
    }

    /// Delete a single file, clearing the read-only attribute if necessary.
    pub fn delete_file(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        if let Ok(meta) = fs::metadata(path) {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = fs::set_permissions(path, perms);
            }
        }

        fs::remove_file(path)
            .with_context(|| format!("Failed to delete file '{}'", path.display()))
    }

    /// True if `path` exists and is a regular file (symlinks are followed).
    pub fn is_regular_file(path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    /// Resolve `path` against `base` unless it is already absolute.
    pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }

    /// Sorted names of the entries directly inside `dir`.
    pub fn list_file_names(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to list directory '{}'", dir.display()))?
        {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
