pub mod store;

use crate::hasher::ContentHash;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub use store::CatalogStore;

/// One known file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub hash: ContentHash,
    pub path: PathBuf,
    pub size: u64,
}

impl CatalogEntry {
    pub fn new(hash: ContentHash, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            hash,
            path: path.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub entries: usize,
    pub distinct_hashes: usize,
    pub total_bytes: u64,
}

/// The in-memory registry: entries indexed by content hash (zero or more per
/// hash) and by path (at most one per path).
///
/// Both indexes are private and every mutator keeps them in agreement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Catalog {
    by_hash: BTreeMap<ContentHash, Vec<CatalogEntry>>,
    by_path: HashMap<PathBuf, ContentHash>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn lookup_by_hash(&self, hash: ContentHash) -> &[CatalogEntry] {
        self.by_hash.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lookup_by_path(&self, path: &Path) -> Option<&CatalogEntry> {
        let hash = self.by_path.get(path)?;
        self.by_hash.get(hash)?.iter().find(|entry| entry.path == path)
    }

    /// Entries in hash order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.by_hash.values().flatten()
    }

    /// Insert an entry. Any entry already recorded at the same path is
    /// displaced and returned.
    pub fn insert(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        let displaced = self.remove_path(&entry.path);
        self.by_path.insert(entry.path.clone(), entry.hash);
        self.by_hash.entry(entry.hash).or_default().push(entry);
        displaced
    }

    /// Point the entry `hash`@`from` at `to`. An unrelated entry already at
    /// `to` is displaced. Returns false when no such entry exists.
    pub fn update_path(&mut self, hash: ContentHash, from: &Path, to: &Path, size: u64) -> bool {
        let exists = self
            .lookup_by_hash(hash)
            .iter()
            .any(|entry| entry.path == from);
        if !exists {
            return false;
        }
        if from != to {
            self.remove_path(to);
        }

        if let Some(entry) = self
            .by_hash
            .get_mut(&hash)
            .and_then(|entries| entries.iter_mut().find(|entry| entry.path == from))
        {
            entry.path = to.to_path_buf();
            entry.size = size;
        }
        self.by_path.remove(from);
        self.by_path.insert(to.to_path_buf(), hash);
        true
    }

    pub fn remove_path(&mut self, path: &Path) -> Option<CatalogEntry> {
        let hash = self.by_path.remove(path)?;
        let entries = self.by_hash.get_mut(&hash)?;
        let index = entries.iter().position(|entry| entry.path == path)?;
        let removed = entries.remove(index);
        if entries.is_empty() {
            self.by_hash.remove(&hash);
        }
        Some(removed)
    }

    /// Remove `hash`@`path` only if that path is still recorded under `hash`.
    pub fn remove_entry(&mut self, hash: ContentHash, path: &Path) -> Option<CatalogEntry> {
        match self.by_path.get(path) {
            Some(recorded) if *recorded == hash => self.remove_path(path),
            _ => None,
        }
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            entries: self.len(),
            distinct_hashes: self.by_hash.len(),
            total_bytes: self.entries().map(|entry| entry.size).sum(),
        }
    }
}

impl FromIterator<CatalogEntry> for Catalog {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for entry in iter {
            catalog.insert(entry);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, path: &str, size: u64) -> CatalogEntry {
        CatalogEntry::new(ContentHash(hash), path, size)
    }

    #[test]
    fn test_lookups_agree() {
        let catalog: Catalog = vec![entry(1, "/a/one.txt", 10), entry(2, "/a/two.txt", 20)]
            .into_iter()
            .collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup_by_hash(ContentHash(1))[0].path, PathBuf::from("/a/one.txt"));
        assert_eq!(catalog.lookup_by_path(Path::new("/a/two.txt")).unwrap().hash, ContentHash(2));
        assert!(catalog.lookup_by_hash(ContentHash(3)).is_empty());
        assert!(catalog.lookup_by_path(Path::new("/a/three.txt")).is_none());
    }

    #[test]
    fn test_insert_displaces_same_path() {
        let mut catalog = Catalog::new();
        catalog.insert(entry(1, "/a/file.txt", 10));
        let displaced = catalog.insert(entry(2, "/a/file.txt", 12));

        assert_eq!(displaced.unwrap().hash, ContentHash(1));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.lookup_by_hash(ContentHash(1)).is_empty());
    }

    #[test]
    fn test_multiple_paths_per_hash() {
        let mut catalog = Catalog::new();
        catalog.insert(entry(7, "/x/a", 5));
        catalog.insert(entry(7, "/y/a", 5));

        assert_eq!(catalog.lookup_by_hash(ContentHash(7)).len(), 2);
        assert_eq!(catalog.stats().distinct_hashes, 1);
        assert_eq!(catalog.stats().total_bytes, 10);
    }

    #[test]
    fn test_update_path_moves_both_indexes() {
        let mut catalog: Catalog = vec![entry(1, "/a/old.txt", 100)].into_iter().collect();

        assert!(catalog.update_path(ContentHash(1), Path::new("/a/old.txt"), Path::new("/b/new.txt"), 100));
        assert!(catalog.lookup_by_path(Path::new("/a/old.txt")).is_none());
        assert_eq!(catalog.lookup_by_path(Path::new("/b/new.txt")).unwrap().hash, ContentHash(1));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_update_path_unknown_entry_is_noop() {
        let mut catalog: Catalog = vec![entry(1, "/a/old.txt", 100)].into_iter().collect();
        assert!(!catalog.update_path(ContentHash(2), Path::new("/a/old.txt"), Path::new("/b"), 1));
        assert!(!catalog.update_path(ContentHash(1), Path::new("/a/other"), Path::new("/b"), 1));
        assert_eq!(catalog.lookup_by_path(Path::new("/a/old.txt")).unwrap().size, 100);
    }

    #[test]
    fn test_remove_entry_checks_hash() {
        let mut catalog: Catalog = vec![entry(1, "/a/f", 1)].into_iter().collect();
        assert!(catalog.remove_entry(ContentHash(2), Path::new("/a/f")).is_none());
        assert!(catalog.remove_entry(ContentHash(1), Path::new("/a/f")).is_some());
        assert!(catalog.is_empty());
    }
}
