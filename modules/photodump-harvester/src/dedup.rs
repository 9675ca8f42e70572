use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use photodump_common::HarvestError;

/// Presence set of archived file names, backed by the archive directory.
///
/// Entries are only ever added. A miss in memory falls back to a single
/// existence check on disk, which also promotes the name on a hit.
pub struct DedupCache {
    root: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl DedupCache {
    /// Pre-populate from every entry currently in `root`.
    pub async fn load(root: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let root = root.into();
        let mut seen = HashSet::new();

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| HarvestError::fs(&root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvestError::fs(&root, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                seen.insert(name.to_string());
            }
        }

        info!(entries = seen.len(), root = %root.display(), "Media cache loaded");
        Ok(Self {
            root,
            seen: Mutex::new(seen),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Memory-only lookup. Never touches the disk.
    pub fn contains_cached(&self, file_name: &str) -> bool {
        self.lock().contains(file_name)
    }

    /// Memory first, then the archive directory.
    pub async fn has(&self, file_name: &str) -> bool {
        if self.contains_cached(file_name) {
            return true;
        }

        let on_disk = tokio::fs::try_exists(self.root.join(file_name))
            .await
            .unwrap_or(false);
        if on_disk {
            self.mark_seen(file_name);
        }
        on_disk
    }

    pub fn mark_seen(&self, file_name: &str) {
        self.lock().insert(file_name.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // The set is only mutated by single inserts, so a poisoned guard is still consistent.
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_listing_answers_without_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();

        let cache = DedupCache::load(dir.path()).await.unwrap();

        // Remove the files: a memory hit must not depend on the disk.
        std::fs::remove_file(dir.path().join("a.jpg")).unwrap();
        std::fs::remove_file(dir.path().join("b.png")).unwrap();

        assert!(cache.contains_cached("a.jpg"));
        assert!(cache.has("a.jpg").await);
        assert!(cache.has("b.png").await);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn disk_fallback_promotes_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::load(dir.path()).await.unwrap();
        assert!(cache.is_empty());

        std::fs::write(dir.path().join("late.jpg"), b"x").unwrap();
        assert!(!cache.contains_cached("late.jpg"));
        assert!(cache.has("late.jpg").await);
        assert!(cache.contains_cached("late.jpg"));
    }

    #[tokio::test]
    async fn unknown_name_is_a_miss_and_mark_seen_skips_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::load(dir.path()).await.unwrap();

        assert!(!cache.has("nope.jpg").await);
        cache.mark_seen("nope.jpg");
        assert!(cache.has("nope.jpg").await);
        assert!(!dir.path().join("nope.jpg").exists());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DedupCache::load(dir.path().join("absent")).await.is_err());
    }
}
