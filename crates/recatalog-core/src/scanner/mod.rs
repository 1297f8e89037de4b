pub mod walk;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

pub use walk::Scanner;

/// A regular file found during this run. Its hash is not known yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl ScanCandidate {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            modified: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Symlink,
    Empty,
    Unreadable,
    NonUtf8Path,
    MissingRoot,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::Symlink => "symbolic link",
            IssueKind::Empty => "zero-byte file",
            IssueKind::Unreadable => "unreadable",
            IssueKind::NonUtf8Path => "non-UTF-8 path",
            IssueKind::MissingRoot => "missing root",
        };
        f.write_str(label)
    }
}

/// A file skipped during the run. Never aborts the traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIssue {
    pub path: PathBuf,
    pub kind: IssueKind,
    pub message: String,
}

impl FileIssue {
    pub fn new(path: impl Into<PathBuf>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path.display(), self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Candidate(ScanCandidate),
    Skipped(FileIssue),
}
