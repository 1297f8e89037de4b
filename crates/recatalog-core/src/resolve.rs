use crate::catalog::CatalogEntry;
use crate::error::Result;
use crate::hasher::ContentHash;
use crate::reconcile::Mode;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The same content exists at more than one path.
    DuplicateContent,
    /// A catalogued path now holds different content.
    PathHashMismatch,
    /// Catalogued content found at a new path.
    RenamedMatch,
    /// Content the catalog has never seen.
    Unmatched,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictKind::DuplicateContent => "duplicate content",
            ConflictKind::PathHashMismatch => "path/hash mismatch",
            ConflictKind::RenamedMatch => "renamed match",
            ConflictKind::Unmatched => "unmatched",
        };
        f.write_str(label)
    }
}

/// One of the paths involved in a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictCandidate {
    pub path: PathBuf,
    pub size: u64,
    /// Recorded in the catalog before this run.
    pub catalogued: bool,
    /// Present on disk right now.
    pub exists: bool,
}

/// An ambiguity the reconciler will not decide on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictCase {
    pub kind: ConflictKind,
    pub mode: Mode,
    pub hash: ContentHash,
    /// Catalogued candidates first, then this run's candidates in scan order.
    pub candidates: Vec<ConflictCandidate>,
    /// Index into `candidates` of the suggested keeper.
    pub suggested: usize,
    /// For a path/hash mismatch, the entry currently recorded at the path.
    pub replaces: Option<CatalogEntry>,
}

impl ConflictCase {
    pub fn duplicate(
        mode: Mode,
        hash: ContentHash,
        candidates: Vec<ConflictCandidate>,
        favored_paths: &[PathBuf],
    ) -> Self {
        let suggested = suggest_keeper(&candidates, favored_paths);
        Self {
            kind: ConflictKind::DuplicateContent,
            mode,
            hash,
            candidates,
            suggested,
            replaces: None,
        }
    }

    pub fn path_hash_mismatch(
        mode: Mode,
        hash: ContentHash,
        candidate: ConflictCandidate,
        replaces: CatalogEntry,
    ) -> Self {
        Self {
            kind: ConflictKind::PathHashMismatch,
            mode,
            hash,
            candidates: vec![candidate],
            suggested: 0,
            replaces: Some(replaces),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().map(|c| c.path.as_path())
    }
}

/// Operator decision for one [`ConflictCase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the candidate at this index; the others become deletion
    /// candidates where the mode permits deleting.
    Keep(usize),
    /// Leave this case alone. It is reported as unresolved.
    Skip,
    /// Stop the run and discard everything decided so far.
    Abort,
}

/// The operator boundary. Calls are synchronous and one at a time.
pub trait ConflictResolver {
    fn resolve(&mut self, case: &ConflictCase) -> Result<Decision>;

    /// Final confirmation before any file is deleted. Declining keeps the
    /// catalog changes but drops every deletion.
    fn confirm_deletions(&mut self, paths: &[PathBuf]) -> Result<bool>;
}

/// Decides without asking anyone.
///
/// Ingest duplicates keep the catalogued copy (or the best-scoring candidate
/// when none is catalogued); in-place modifications are re-catalogued.
/// Location-repair conflicts are always skipped and reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnattendedResolver {
    allow_delete: bool,
}

impl UnattendedResolver {
    pub fn new(allow_delete: bool) -> Self {
        Self { allow_delete }
    }
}

impl ConflictResolver for UnattendedResolver {
    fn resolve(&mut self, case: &ConflictCase) -> Result<Decision> {
        let decision = match (case.mode, case.kind) {
            (Mode::Ingest, ConflictKind::DuplicateContent) => {
                let catalogued = case
                    .candidates
                    .iter()
                    .position(|c| c.catalogued && c.exists)
                    .or_else(|| case.candidates.iter().position(|c| c.catalogued));
                Decision::Keep(catalogued.unwrap_or(case.suggested))
            }
            (Mode::Ingest, ConflictKind::PathHashMismatch) => Decision::Keep(0),
            _ => Decision::Skip,
        };
        debug!("Unattended decision for {} ({}): {:?}", case.hash, case.kind, decision);
        Ok(decision)
    }

    fn confirm_deletions(&mut self, _paths: &[PathBuf]) -> Result<bool> {
        Ok(self.allow_delete)
    }
}

/// Pick the candidate most worth keeping.
///
/// Existing files always beat missing ones; ties go to the earliest candidate.
pub fn suggest_keeper(candidates: &[ConflictCandidate], favored_paths: &[PathBuf]) -> usize {
    let any_exists = candidates.iter().any(|c| c.exists);
    let mut best: Option<(usize, i64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        if any_exists && !candidate.exists {
            continue;
        }
        let score = keeper_score(&candidate.path, candidate.catalogued, favored_paths);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index).unwrap_or(0)
}

/// Shorter paths, catalogued files, readable and portable names, and favored
/// locations score higher.
pub fn keeper_score(path: &Path, catalogued: bool, favored_paths: &[PathBuf]) -> i64 {
    let depth = normal_components(path) as i64;
    let mut score = 15 - depth;

    if catalogued {
        score += 5;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name_len = name.chars().count();
    if name_len > 0 {
        let alphabetic = name.chars().filter(|c| c.is_alphabetic()).count();
        score += ((alphabetic as f64 / name_len as f64) * 10.0).round() as i64;
    }
    if is_portable_file_name(&name) {
        score += 4;
    }

    if favored_paths.iter().any(|favored| favored == path) {
        score += 1000;
    } else if let Some(parent) = path.parent() {
        let parent_depth = normal_components(parent);
        let bonus = favored_paths
            .iter()
            .filter(|favored| normal_components(favored) > 0 && parent.starts_with(favored))
            .map(|favored| {
                let matched = normal_components(favored) as f64;
                ((matched / parent_depth as f64) * 100.0).round() as i64
            })
            .max()
            .unwrap_or(0);
        score += bonus;
    }

    score
}

fn normal_components(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

fn is_portable_file_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str, catalogued: bool, exists: bool) -> ConflictCandidate {
        ConflictCandidate {
            path: PathBuf::from(path),
            size: 10,
            catalogued,
            exists,
        }
    }

    #[test]
    fn test_shorter_path_scores_higher() {
        let shallow = keeper_score(Path::new("/m/film.mkv"), false, &[]);
        let deep = keeper_score(Path::new("/m/a/b/c/film.mkv"), false, &[]);
        assert!(shallow > deep);
    }

    #[test]
    fn test_portable_name_scores_higher() {
        let plain = keeper_score(Path::new("/m/film.mkv"), false, &[]);
        let odd = keeper_score(Path::new("/m/film (1).mkv"), false, &[]);
        assert!(plain > odd);
    }

    #[test]
    fn test_favored_directory_wins() {
        let favored = vec![PathBuf::from("/archive/keep")];
        let candidates = vec![
            candidate("/a/film.mkv", false, true),
            candidate("/archive/keep/deeper/film.mkv", false, true),
        ];
        assert_eq!(suggest_keeper(&candidates, &favored), 1);
    }

    #[test]
    fn test_exact_favored_path_wins() {
        let favored = vec![PathBuf::from("/x/y/z/copy (2).mkv")];
        let candidates = vec![
            candidate("/film.mkv", true, true),
            candidate("/x/y/z/copy (2).mkv", false, true),
        ];
        assert_eq!(suggest_keeper(&candidates, &favored), 1);
    }

    #[test]
    fn test_missing_never_suggested_over_existing() {
        let candidates = vec![
            candidate("/a.mkv", true, false),
            candidate("/very/deep/path/to/some/file_copy.mkv", false, true),
        ];
        assert_eq!(suggest_keeper(&candidates, &[]), 1);
    }

    #[test]
    fn test_unattended_keeps_catalogued_on_ingest() {
        let case = ConflictCase::duplicate(
            Mode::Ingest,
            ContentHash(1),
            vec![
                candidate("/deep/down/there/orig.mkv", true, true),
                candidate("/new.mkv", false, true),
            ],
            &[],
        );
        let mut resolver = UnattendedResolver::new(true);
        assert_eq!(resolver.resolve(&case).unwrap(), Decision::Keep(0));
    }

    #[test]
    fn test_unattended_skips_repair_conflicts() {
        let case = ConflictCase::duplicate(
            Mode::Repair,
            ContentHash(1),
            vec![candidate("/old.mkv", true, true), candidate("/new.mkv", false, true)],
            &[],
        );
        let mut resolver = UnattendedResolver::new(true);
        assert_eq!(resolver.resolve(&case).unwrap(), Decision::Skip);
    }

    #[test]
    fn test_unattended_confirmation_follows_flag() {
        assert!(!UnattendedResolver::new(false).confirm_deletions(&[]).unwrap());
        assert!(UnattendedResolver::new(true).confirm_deletions(&[]).unwrap());
    }
}
