use crate::catalog::CatalogEntry;
use crate::filesystem::FileSystem;
use crate::hasher::ContentHash;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A single decided change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    DeleteFile {
        path: PathBuf,
    },
    UpdateCatalogPath {
        hash: ContentHash,
        from: PathBuf,
        to: PathBuf,
        size: u64,
    },
    AddCatalogEntry {
        entry: CatalogEntry,
    },
    RemoveCatalogEntry {
        hash: ContentHash,
        path: PathBuf,
    },
}

impl Action {
    pub fn is_deletion(&self) -> bool {
        matches!(self, Action::DeleteFile { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::DeleteFile { path } => write!(f, "delete {}", path.display()),
            Action::UpdateCatalogPath { hash, from, to, .. } => {
                write!(f, "move {} {} -> {}", hash, from.display(), to.display())
            }
            Action::AddCatalogEntry { entry } => {
                write!(f, "add {} {} ({} bytes)", entry.hash, entry.path.display(), entry.size)
            }
            Action::RemoveCatalogEntry { hash, path } => {
                write!(f, "forget {} {}", hash, path.display())
            }
        }
    }
}

/// Decided, not yet executed changes. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationPlan {
    actions: Vec<Action>,
}

impl MutationPlan {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn deletions(&self) -> impl Iterator<Item = &Path> {
        self.actions.iter().filter_map(|action| match action {
            Action::DeleteFile { path } => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

/// Accumulates actions for a whole run.
///
/// Refuses a second `AddCatalogEntry` for one hash, repeated deletions of one
/// path, and deleting any path the plan keeps (add or update target). With a
/// filesystem attached, a kept file reached through another path is refused
/// too.
#[derive(Default)]
pub struct PlanBuilder<'a> {
    actions: Vec<Action>,
    added: HashSet<ContentHash>,
    kept: HashSet<PathBuf>,
    deleting: HashSet<PathBuf>,
    fs: Option<&'a dyn FileSystem>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guarded_by(mut self, fs: &'a dyn FileSystem) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn add_entry(&mut self, entry: CatalogEntry) -> bool {
        if !self.added.insert(entry.hash) {
            warn!("Refusing second catalog addition for {} ({})", entry.hash, entry.path.display());
            return false;
        }
        if self.deleting.contains(&entry.path) {
            warn!("Refusing to catalog {} which is planned for deletion", entry.path.display());
            self.added.remove(&entry.hash);
            return false;
        }
        self.kept.insert(entry.path.clone());
        self.actions.push(Action::AddCatalogEntry { entry });
        true
    }

    pub fn update_path(&mut self, hash: ContentHash, from: &Path, to: &Path, size: u64) -> bool {
        if self.deleting.contains(to) {
            warn!("Refusing to point {} at {} which is planned for deletion", hash, to.display());
            return false;
        }
        self.kept.insert(to.to_path_buf());
        self.actions.push(Action::UpdateCatalogPath {
            hash,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            size,
        });
        true
    }

    /// Mark a path the plan must not delete without changing its entry.
    pub fn keep(&mut self, path: &Path) {
        self.kept.insert(path.to_path_buf());
    }

    pub fn remove_entry(&mut self, hash: ContentHash, path: &Path) {
        self.actions.push(Action::RemoveCatalogEntry {
            hash,
            path: path.to_path_buf(),
        });
    }

    pub fn delete_file(&mut self, path: &Path) -> bool {
        if self.keeps(path) {
            warn!("Refusing to delete {} which the plan keeps", path.display());
            return false;
        }
        if !self.deleting.insert(path.to_path_buf()) {
            return false;
        }
        self.actions.push(Action::DeleteFile {
            path: path.to_path_buf(),
        });
        true
    }

    fn keeps(&self, path: &Path) -> bool {
        if self.kept.contains(path) {
            return true;
        }
        match self.fs {
            Some(fs) => self.kept.iter().any(|kept| fs.same_file(kept, path)),
            None => false,
        }
    }

    pub fn deletion_targets(&self) -> Vec<PathBuf> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::DeleteFile { path } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop every deletion, keeping catalog changes.
    pub fn without_deletions(mut self) -> Self {
        self.actions.retain(|action| !action.is_deletion());
        self.deleting.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn finish(self) -> MutationPlan {
        MutationPlan {
            actions: self.actions,
        }
    }
}
