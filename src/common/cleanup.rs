use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, warn};

/// Remove the entries of `dir` selected by `matches` that were last modified
/// at least `older_than` ago. Directories go with their contents.
///
/// A missing `dir` has nothing to clean. Entries that cannot be removed are
/// logged and skipped.
pub async fn remove_stale_entries<F>(dir: &Path, older_than: Duration, matches: F) -> io::Result<usize>
where
    F: Fn(&Path) -> bool,
{
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !matches(&path) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let age = metadata
            .modified()
            .map(|t| now.duration_since(t).unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);
        if age < older_than {
            continue;
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                debug!("Removed stale {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stale {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_matching_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.json"), b"{}").unwrap();
        std::fs::create_dir_all(dir.path().join("nested.tmp/inner")).unwrap();
        std::fs::write(dir.path().join("nested.tmp/inner/file"), b"x").unwrap();

        let removed = remove_stale_entries(dir.path(), Duration::ZERO, |p| {
            p.extension().and_then(|e| e.to_str()) == Some("tmp")
        })
        .await
        .unwrap();

        assert_eq!(removed, 2);
        assert!(!dir.path().join("a.tmp").exists());
        assert!(!dir.path().join("nested.tmp").exists());
        assert!(dir.path().join("keep.json").exists());
    }

    #[tokio::test]
    async fn recent_entries_survive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.part"), b"x").unwrap();

        let removed = remove_stale_entries(dir.path(), Duration::from_secs(3600), |_| true)
            .await
            .unwrap();

        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.part").exists());
    }

    #[tokio::test]
    async fn missing_directory_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let removed = remove_stale_entries(&dir.path().join("absent"), Duration::ZERO, |_| true)
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
