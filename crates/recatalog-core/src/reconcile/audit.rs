use super::{resolve_identities, IdentityOptions, ReconcileContext};
use crate::catalog::{Catalog, CatalogEntry};
use crate::hasher::ContentHash;
use crate::resolve::ConflictKind;
use crate::scanner::{FileIssue, ScanEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Classification of one scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditFinding {
    /// Recorded at this path with this content.
    Cataloged { path: PathBuf },
    /// Recorded at this path, but the content changed and is not catalogued
    /// anywhere.
    Modified {
        path: PathBuf,
        recorded: ContentHash,
        found: ContentHash,
    },
    /// Catalogued content found at a path the catalog does not record for it.
    RenamedMatch {
        path: PathBuf,
        hash: ContentHash,
        previous_path: PathBuf,
        previous_exists: bool,
        /// The path was itself catalogued with other content.
        modified: bool,
    },
    /// Content the catalog has never seen.
    Unmatched { path: PathBuf, hash: ContentHash },
}

impl AuditFinding {
    pub fn path(&self) -> &PathBuf {
        match self {
            AuditFinding::Cataloged { path }
            | AuditFinding::Modified { path, .. }
            | AuditFinding::RenamedMatch { path, .. }
            | AuditFinding::Unmatched { path, .. } => path,
        }
    }

    /// The conflict this finding would raise in a mutating mode.
    pub fn kind(&self) -> Option<ConflictKind> {
        match self {
            AuditFinding::Cataloged { .. } => None,
            AuditFinding::Modified { .. } => Some(ConflictKind::PathHashMismatch),
            AuditFinding::RenamedMatch { .. } => Some(ConflictKind::RenamedMatch),
            AuditFinding::Unmatched { .. } => Some(ConflictKind::Unmatched),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditCounts {
    pub cataloged: usize,
    pub modified: usize,
    pub renamed: usize,
    pub unmatched: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<AuditFinding>,
    pub issues: Vec<FileIssue>,
}

impl AuditReport {
    pub fn counts(&self) -> AuditCounts {
        let mut counts = AuditCounts {
            issues: self.issues.len(),
            ..AuditCounts::default()
        };
        for finding in &self.findings {
            match finding {
                AuditFinding::Cataloged { .. } => counts.cataloged += 1,
                AuditFinding::Modified { .. } => counts.modified += 1,
                AuditFinding::RenamedMatch { .. } => counts.renamed += 1,
                AuditFinding::Unmatched { .. } => counts.unmatched += 1,
            }
        }
        counts
    }

    pub fn renamed(&self) -> impl Iterator<Item = &AuditFinding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, AuditFinding::RenamedMatch { .. }))
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &AuditFinding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, AuditFinding::Unmatched { .. }))
    }
}

/// Mode C: classify every scanned file, in scan order. Reads the catalog,
/// never changes it.
pub fn audit<I>(catalog: &Catalog, events: I, ctx: &ReconcileContext<'_>) -> AuditReport
where
    I: IntoIterator<Item = ScanEvent>,
{
    let mut scan_order: HashMap<PathBuf, usize> = HashMap::new();
    let events = events.into_iter().inspect(|event| {
        if let ScanEvent::Candidate(candidate) = event {
            let next = scan_order.len();
            scan_order.entry(candidate.path.clone()).or_insert(next);
        }
    });
    let resolution = resolve_identities(catalog, events, ctx, IdentityOptions::default());
    let mut findings: Vec<AuditFinding> = resolution
        .trusted
        .into_iter()
        .map(|candidate| AuditFinding::Cataloged {
            path: candidate.path,
        })
        .collect();

    for item in resolution.identified {
        let path = item.candidate.path;
        let elsewhere = catalog.lookup_by_hash(item.hash);
        let finding = match catalog.lookup_by_path(&path) {
            Some(entry) if entry.hash == item.hash => AuditFinding::Cataloged { path },
            Some(entry) => match previous_location(elsewhere, ctx) {
                Some((previous_path, previous_exists)) => AuditFinding::RenamedMatch {
                    path,
                    hash: item.hash,
                    previous_path,
                    previous_exists,
                    modified: true,
                },
                None => AuditFinding::Modified {
                    path,
                    recorded: entry.hash,
                    found: item.hash,
                },
            },
            None => match previous_location(elsewhere, ctx) {
                Some((previous_path, previous_exists)) => AuditFinding::RenamedMatch {
                    path,
                    hash: item.hash,
                    previous_path,
                    previous_exists,
                    modified: false,
                },
                None => AuditFinding::Unmatched {
                    path,
                    hash: item.hash,
                },
            },
        };
        findings.push(finding);
    }
    findings.sort_by_key(|finding| scan_order.get(finding.path()).copied().unwrap_or(usize::MAX));

    let report = AuditReport {
        generated_at: Utc::now(),
        findings,
        issues: resolution.issues,
    };
    let counts = report.counts();
    info!(
        "Audit: {} cataloged, {} modified, {} renamed, {} unmatched, {} skipped",
        counts.cataloged, counts.modified, counts.renamed, counts.unmatched, counts.issues
    );
    report
}

/// The recorded path most likely to be the file's old location: a vanished
/// one if any, else the first.
fn previous_location(entries: &[CatalogEntry], ctx: &ReconcileContext<'_>) -> Option<(PathBuf, bool)> {
    let first = entries.first()?;
    let located = entries
        .iter()
        .map(|entry| (entry, ctx.fs.exists(&entry.path)))
        .find(|(_, exists)| !exists)
        .unwrap_or_else(|| (first, true));
    Some((located.0.path.clone(), located.1))
}
