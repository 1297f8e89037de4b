//! Reconciliation of the catalog against a scan.
//!
//! All three modes share [`resolve_identities`]: a candidate whose path and
//! size match a catalog entry is a *trusted match* and is never hashed, so a
//! file rewritten in place with identical length goes unnoticed. Every other
//! candidate is hashed once, in
//! parallel, and the results are rejoined in scan order before any decision
//! is made.

pub mod audit;
pub mod ingest;
pub mod repair;

use crate::catalog::{Catalog, CatalogEntry};
use crate::execute::ExecutionReport;
use crate::filesystem::FileSystem;
use crate::hasher::{ContentHash, Hasher};
use crate::plan::{MutationPlan, PlanBuilder};
use crate::progress::ProgressReporter;
use crate::resolve::{ConflictCandidate, ConflictCase};
use crate::scanner::{FileIssue, IssueKind, ScanCandidate, ScanEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use audit::{audit, AuditCounts, AuditFinding, AuditReport};
pub use ingest::{ingest, IngestOptions};
pub use repair::{repair, RepairOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Ingest,
    Repair,
    Audit,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Ingest => "ingest",
            Mode::Repair => "repair",
            Mode::Audit => "audit",
        };
        f.write_str(label)
    }
}

/// Collaborators every mode needs.
#[derive(Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub reporter: &'a dyn ProgressReporter,
}

/// A candidate whose content hash is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    pub candidate: ScanCandidate,
    pub hash: ContentHash,
}

/// Output of the shared identity step.
#[derive(Debug, Default)]
pub struct Resolution {
    pub trusted: Vec<ScanCandidate>,
    /// Non-trusted candidates with their hash, in scan order.
    pub identified: Vec<Identified>,
    pub issues: Vec<FileIssue>,
    pub scanned: usize,
    pub hashed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOptions {
    /// Assume the hash of the only catalog entry with the candidate's size.
    pub infer_by_size: bool,
}

/// Trust-check every candidate against the catalog and hash the rest.
pub fn resolve_identities<I>(
    catalog: &Catalog,
    events: I,
    ctx: &ReconcileContext<'_>,
    options: IdentityOptions,
) -> Resolution
where
    I: IntoIterator<Item = ScanEvent>,
{
    let mut resolution = Resolution::default();
    let mut pending: Vec<(ScanCandidate, Option<ContentHash>)> = Vec::new();
    let size_index = options.infer_by_size.then(|| SizeIndex::new(catalog));

    ctx.reporter.on_scan_start();
    let scan_start = Instant::now();
    for event in events {
        let candidate = match event {
            ScanEvent::Candidate(candidate) => candidate,
            ScanEvent::Skipped(issue) => {
                resolution.issues.push(issue);
                continue;
            }
        };
        resolution.scanned += 1;
        ctx.reporter.on_scan_progress(resolution.scanned, &candidate.path);

        let trusted = catalog
            .lookup_by_path(&candidate.path)
            .is_some_and(|entry| entry.size == candidate.size);
        if trusted {
            resolution.trusted.push(candidate);
            continue;
        }

        let inferred = size_index
            .as_ref()
            .and_then(|index| index.infer(candidate.size, ctx.fs));
        if let Some(hash) = inferred {
            debug!("Inferred {} for {} from its size", hash, candidate.path.display());
        }
        pending.push((candidate, inferred));
    }
    let scan_secs = scan_start.elapsed().as_secs_f64();
    ctx.reporter
        .on_scan_complete(resolution.scanned, resolution.trusted.len(), scan_secs);
    debug!(
        "Scan completed in {:.2}s: {} candidates, {} trusted, {} skipped",
        scan_secs,
        resolution.scanned,
        resolution.trusted.len(),
        resolution.issues.len()
    );

    let to_hash: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, hash)| hash.is_none())
        .map(|(candidate, _)| candidate.path.clone())
        .collect();
    resolution.hashed = to_hash.len();
    let hash_start = Instant::now();
    let mut hashes = Hasher::new(ctx.fs)
        .hash_all(&to_hash, ctx.reporter)
        .into_iter();
    debug!(
        "Hashed {} files in {:.2}s",
        to_hash.len(),
        hash_start.elapsed().as_secs_f64()
    );

    for (candidate, inferred) in pending {
        let hash = match inferred {
            Some(hash) => hash,
            None => match hashes.next() {
                Some(Ok(hash)) => hash,
                Some(Err(e)) => {
                    warn!("Skipping unreadable {}: {}", candidate.path.display(), e);
                    resolution.issues.push(FileIssue::new(
                        &candidate.path,
                        IssueKind::Unreadable,
                        e.to_string(),
                    ));
                    continue;
                }
                None => continue,
            },
        };
        resolution.identified.push(Identified { candidate, hash });
    }

    resolution
}

/// Candidates sharing one hash, in first-seen order.
pub(crate) struct HashGroup<'a> {
    pub hash: ContentHash,
    pub members: Vec<&'a ScanCandidate>,
}

pub(crate) fn group_by_hash(identified: &[Identified]) -> Vec<HashGroup<'_>> {
    let mut order: HashMap<ContentHash, usize> = HashMap::new();
    let mut groups: Vec<HashGroup<'_>> = Vec::new();
    for item in identified {
        let index = *order.entry(item.hash).or_insert_with(|| {
            groups.push(HashGroup {
                hash: item.hash,
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[index].members.push(&item.candidate);
    }
    groups
}

/// Members not already recorded at their own path under the group hash.
pub(crate) fn fresh_members<'a>(catalog: &Catalog, group: &HashGroup<'a>) -> Vec<&'a ScanCandidate> {
    group
        .members
        .iter()
        .copied()
        .filter(|candidate| {
            catalog
                .lookup_by_path(&candidate.path)
                .map_or(true, |entry| entry.hash != group.hash)
        })
        .collect()
}

/// A hash group's catalogued entries and fresh candidates once candidates that
/// are a catalogued file reached through another path (symlinked directory,
/// bind mount) have been paired off.
pub(crate) struct AliasSplit<'a> {
    /// (recorded entry, the same file as scanned)
    pub aliases: Vec<(CatalogEntry, &'a ScanCandidate)>,
    /// Catalogued entries, aliased ones already pointing at the scanned path.
    pub catalogued: Vec<CatalogEntry>,
    pub fresh: Vec<&'a ScanCandidate>,
}

pub(crate) fn split_aliases<'a>(
    catalogued: &[CatalogEntry],
    fresh: Vec<&'a ScanCandidate>,
    fs: &dyn FileSystem,
) -> AliasSplit<'a> {
    let mut split = AliasSplit {
        aliases: Vec::new(),
        catalogued: catalogued.to_vec(),
        fresh: Vec::with_capacity(fresh.len()),
    };
    let mut paired = vec![false; catalogued.len()];
    for candidate in fresh {
        let alias = (0..catalogued.len()).find(|&index| {
            let entry = &catalogued[index];
            !paired[index]
                && entry.path != candidate.path
                && fs.exists(&entry.path)
                && fs.same_file(&entry.path, &candidate.path)
        });
        match alias {
            Some(index) => {
                paired[index] = true;
                split.aliases.push((catalogued[index].clone(), candidate));
                split.catalogued[index].path = candidate.path.clone();
            }
            None => split.fresh.push(candidate),
        }
    }
    split
}

/// Repoint each aliased entry at the path the scan reached it by.
pub(crate) fn plan_alias_corrections(
    builder: &mut PlanBuilder<'_>,
    catalog: &Catalog,
    hash: ContentHash,
    aliases: &[(CatalogEntry, &ScanCandidate)],
) {
    for (entry, candidate) in aliases {
        if let Some(stale) = catalog.lookup_by_path(&candidate.path) {
            builder.remove_entry(stale.hash, &stale.path);
        }
        info!(
            "Same file under two paths: {} recorded as {}",
            candidate.path.display(),
            entry.path.display()
        );
        builder.update_path(hash, &entry.path, &candidate.path, candidate.size);
    }
}

/// Catalogued entries first, then fresh candidates.
pub(crate) fn conflict_candidates(
    catalogued: &[CatalogEntry],
    fresh: &[&ScanCandidate],
    fs: &dyn FileSystem,
) -> Vec<ConflictCandidate> {
    catalogued
        .iter()
        .map(|entry| ConflictCandidate {
            path: entry.path.clone(),
            size: entry.size,
            catalogued: true,
            exists: fs.exists(&entry.path),
        })
        .chain(fresh.iter().map(|candidate| ConflictCandidate {
            path: candidate.path.clone(),
            size: candidate.size,
            catalogued: false,
            exists: true,
        }))
        .collect()
}

/// Catalog entries grouped by size, for the opt-in size inference.
struct SizeIndex<'a> {
    by_size: HashMap<u64, Vec<&'a CatalogEntry>>,
}

impl<'a> SizeIndex<'a> {
    fn new(catalog: &'a Catalog) -> Self {
        let mut by_size: HashMap<u64, Vec<&'a CatalogEntry>> = HashMap::new();
        for entry in catalog.entries() {
            by_size.entry(entry.size).or_default().push(entry);
        }
        Self { by_size }
    }

    /// The hash of the only entry with this size, or of the only such entry
    /// whose file has gone missing.
    fn infer(&self, size: u64, fs: &dyn FileSystem) -> Option<ContentHash> {
        let same_size = self.by_size.get(&size)?;
        if let [only] = same_size.as_slice() {
            return Some(only.hash);
        }
        let missing: Vec<_> = same_size
            .iter()
            .filter(|entry| !fs.exists(&entry.path))
            .collect();
        match missing.as_slice() {
            [only] => Some(only.hash),
            _ => None,
        }
    }
}

/// What a reconciliation decided, minus the plan itself.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub mode: Mode,
    pub scanned: usize,
    pub trusted: usize,
    pub hashed: usize,
    pub unresolved: Vec<ConflictCase>,
    /// Files whose content the catalog does not know (location repair).
    pub unmatched: Vec<PathBuf>,
    pub issues: Vec<FileIssue>,
    pub deletions_declined: bool,
}

impl Outcome {
    fn new(mode: Mode, resolution: &Resolution) -> Self {
        Self {
            mode,
            scanned: resolution.scanned,
            trusted: resolution.trusted.len(),
            hashed: resolution.hashed,
            unresolved: Vec::new(),
            unmatched: Vec::new(),
            issues: resolution.issues.clone(),
            deletions_declined: false,
        }
    }
}

/// A finished plan plus what led to it.
#[derive(Debug)]
pub struct Reconciliation {
    pub plan: MutationPlan,
    pub outcome: Outcome,
}

/// Report for an executed ingest or repair run. Produced even when some
/// deletions failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub execution: ExecutionReport,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.execution.failures.is_empty()
    }
}
