//! Filesystem helpers: data-dir resolution and atomic writes.
//!
//! Every durable file Cadence writes (`state.json`, `STATUS.md`) goes through
//! [`write_atomic`]: the content is staged in a hidden temp file next to the
//! target, fsynced, then renamed over it. Readers see either the old file or
//! the new one, never a partial write.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CADENCE_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CADENCE_DATA_DIR` environment variable
/// 2. `~/.cadence`
/// 3. `.cadence` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".cadence");
    }

    PathBuf::from(".cadence")
}

/// Temp-file path used while staging a write to `path`.
///
/// Lives in the same directory so the final rename never crosses a
/// filesystem boundary.
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write `contents` to the staging file for `path` and fsync it.
///
/// The target itself is untouched until [`commit_staged`].
pub async fn stage_write(path: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let staged = staging_path(path);
    let mut file = tokio::fs::File::create(&staged).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(staged)
}

/// Rename a staged file over its target.
pub async fn commit_staged(staged: &Path, path: &Path) -> io::Result<()> {
    tokio::fs::rename(staged, path).await?;

    // Persist the directory entry too; not every platform allows opening a
    // directory, so failures here are ignored.
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }
    Ok(())
}

/// Atomically replace `path` with `contents`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staged = stage_write(path, contents).await?;
    if let Err(e) = commit_staged(&staged, path).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e);
    }
    tracing::trace!(path = %path.display(), bytes = contents.len(), "atomic write complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/data/proj/state.json")),
            PathBuf::from("/data/proj/.state.json.tmp")
        );
    }

    #[tokio::test]
    async fn write_atomic_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj").join("state.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "second");
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn staged_write_leaves_old_content_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"{\"old\":true}").await.unwrap();

        // Simulates a crash between fsync and rename.
        let staged = stage_write(&path, b"{\"new\":tr").await.unwrap();

        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "{\"old\":true}"
        );
        assert!(staged.exists());

        // The next save simply overwrites the leftover staging file.
        write_atomic(&path, b"{\"new\":true}").await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "{\"new\":true}"
        );
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-cadence");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-cadence"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
