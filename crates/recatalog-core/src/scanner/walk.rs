use super::{FileIssue, IssueKind, ScanCandidate, ScanEvent};
use crate::config::non_overlapping_directories;
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::{DirEntry, WalkDir};

/// Lazily enumerates regular files under a set of roots.
///
/// Skips symlinks and 0-byte files with a recorded issue, and prunes paths
/// matching the glob ignore patterns. Every call to [`Scanner::scan`] starts a
/// fresh traversal.
pub struct Scanner {
    roots: Vec<String>,
    ignore_patterns: Vec<Pattern>,
    excluded: Vec<PathBuf>,
}

impl Scanner {
    pub fn new(roots: &[String], ignore_globs: &[String]) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            roots: roots.to_vec(),
            ignore_patterns,
            excluded: Vec::new(),
        }
    }

    /// Never report `path` as a candidate (the catalog file itself).
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.excluded.push(fs::canonicalize(&path).unwrap_or(path));
        self
    }

    /// Canonical, non-overlapping roots, plus issues for roots that do not exist.
    pub fn resolve_roots(&self) -> (Vec<PathBuf>, Vec<FileIssue>) {
        let mut resolved = Vec::new();
        let mut issues = Vec::new();
        for root in &self.roots {
            match fs::canonicalize(root) {
                Ok(path) => resolved.push(path.to_string_lossy().into_owned()),
                Err(e) => {
                    warn!("Skipping root {}: {}", root, e);
                    issues.push(FileIssue::new(root, IssueKind::MissingRoot, e.to_string()));
                }
            }
        }

        let roots = non_overlapping_directories(resolved)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        (roots, issues)
    }

    pub fn scan(&self) -> impl Iterator<Item = ScanEvent> + '_ {
        let (roots, missing) = self.resolve_roots();
        self.scan_resolved(roots, missing)
    }

    /// Walk roots already returned by [`Scanner::resolve_roots`], reporting
    /// `missing` first.
    pub fn scan_resolved(
        &self,
        roots: Vec<PathBuf>,
        missing: Vec<FileIssue>,
    ) -> impl Iterator<Item = ScanEvent> + '_ {
        let walked = roots.into_iter().flat_map(move |root| {
            WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(move |entry| !self.is_ignored(entry.path()))
                .filter_map(move |result| self.classify(result))
        });

        missing.into_iter().map(ScanEvent::Skipped).chain(walked)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.excluded.iter().any(|excluded| excluded == path)
            || self
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(path))
    }

    fn classify(&self, result: walkdir::Result<DirEntry>) -> Option<ScanEvent> {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                warn!("Error reading {}: {}", path.display(), err);
                return Some(ScanEvent::Skipped(FileIssue::new(
                    path,
                    IssueKind::Unreadable,
                    err.to_string(),
                )));
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }
        if file_type.is_symlink() {
            return Some(skipped(entry.path(), IssueKind::Symlink, "links are not followed"));
        }
        if !file_type.is_file() {
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                return Some(skipped(entry.path(), IssueKind::Unreadable, &err.to_string()));
            }
        };
        if metadata.len() == 0 {
            return Some(skipped(entry.path(), IssueKind::Empty, "nothing to fingerprint"));
        }
        if entry.path().to_str().is_none() {
            return Some(skipped(
                entry.path(),
                IssueKind::NonUtf8Path,
                "cannot be recorded in the catalog",
            ));
        }

        Some(ScanEvent::Candidate(ScanCandidate {
            path: entry.into_path(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }))
    }
}

fn skipped(path: &Path, kind: IssueKind, message: &str) -> ScanEvent {
    warn!("Skipping {} ({}): {}", path.display(), kind, message);
    ScanEvent::Skipped(FileIssue::new(path, kind, message))
}
