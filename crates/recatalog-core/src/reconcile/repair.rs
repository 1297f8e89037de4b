use super::{
    conflict_candidates, fresh_members, group_by_hash, plan_alias_corrections, resolve_identities,
    split_aliases, AliasSplit, IdentityOptions, Mode, Outcome, ReconcileContext, Reconciliation,
};
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::hasher::ContentHash;
use crate::plan::PlanBuilder;
use crate::resolve::{ConflictCandidate, ConflictCase, ConflictResolver, Decision};
use crate::scanner::{ScanCandidate, ScanEvent};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    pub favored_paths: Vec<PathBuf>,
    /// Forget entries under the roots whose file is gone and whose content was
    /// not found anywhere in this scan.
    pub prune_missing: bool,
    pub infer_by_size: bool,
}

impl RepairOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            favored_paths: config.favored_paths.iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }
}

/// Mode B: follow catalogued files that were renamed or moved.
///
/// Never plans a deletion. Content the catalog does not know is reported as
/// unmatched and left out of the catalog.
pub fn repair<I>(
    catalog: &Catalog,
    events: I,
    roots: &[PathBuf],
    ctx: &ReconcileContext<'_>,
    resolver: &mut dyn ConflictResolver,
    options: &RepairOptions,
) -> Result<Reconciliation>
where
    I: IntoIterator<Item = ScanEvent>,
{
    let identity = IdentityOptions {
        infer_by_size: options.infer_by_size,
    };
    let resolution = resolve_identities(catalog, events, ctx, identity);
    let mut outcome = Outcome::new(Mode::Repair, &resolution);
    let mut builder = PlanBuilder::new().guarded_by(ctx.fs);

    let mut seen: HashSet<ContentHash> = resolution
        .trusted
        .iter()
        .filter_map(|candidate| catalog.lookup_by_path(&candidate.path))
        .map(|entry| entry.hash)
        .collect();

    for group in group_by_hash(&resolution.identified) {
        let hash = group.hash;
        seen.insert(hash);
        let fresh = fresh_members(catalog, &group);
        if fresh.is_empty() {
            continue;
        }

        if catalog.lookup_by_hash(hash).is_empty() {
            for candidate in &fresh {
                debug!("Unmatched: {}", candidate.path.display());
                outcome.unmatched.push(candidate.path.clone());
            }
            continue;
        }

        let AliasSplit {
            aliases,
            catalogued,
            fresh,
        } = split_aliases(catalog.lookup_by_hash(hash), fresh, ctx.fs);
        plan_alias_corrections(&mut builder, catalog, hash, &aliases);
        if fresh.is_empty() {
            continue;
        }

        let candidates = conflict_candidates(&catalogued, &fresh, ctx.fs);
        let any_exists = candidates.iter().any(|c| c.catalogued && c.exists);
        if fresh.len() == 1 && !any_exists {
            // a plain move: every recorded copy is gone, one new path holds it
            relocate(&mut builder, catalog, hash, &candidates, fresh[0]);
            continue;
        }

        let case = ConflictCase::duplicate(Mode::Repair, hash, candidates, &options.favored_paths);
        match resolver.resolve(&case)? {
            Decision::Keep(index) if index < case.candidates.len() => {
                let keeper = &case.candidates[index];
                if keeper.catalogued {
                    debug!("Keeping recorded path {} for {}", keeper.path.display(), hash);
                } else if let Some(candidate) = fresh.iter().find(|c| c.path == keeper.path) {
                    relocate(&mut builder, catalog, hash, &case.candidates, candidate);
                }
            }
            Decision::Keep(index) => {
                return Err(Error::Other(format!(
                    "resolver chose candidate {} of {} for {}",
                    index,
                    case.candidates.len(),
                    hash
                )));
            }
            Decision::Skip => outcome.unresolved.push(case),
            Decision::Abort => return Err(Error::Cancelled),
        }
    }

    if options.prune_missing {
        prune_missing(&mut builder, catalog, roots, &seen, ctx);
    }

    let plan = builder.finish();
    info!(
        "Repair planned {} actions, {} unmatched, {} conflicts unresolved",
        plan.len(),
        outcome.unmatched.len(),
        outcome.unresolved.len()
    );
    Ok(Reconciliation { plan, outcome })
}

/// Point the catalog at `target`: reuse a vanished entry when there is one,
/// otherwise record the path alongside the existing copies.
fn relocate(
    builder: &mut PlanBuilder<'_>,
    catalog: &Catalog,
    hash: ContentHash,
    candidates: &[ConflictCandidate],
    target: &ScanCandidate,
) {
    if let Some(stale) = catalog.lookup_by_path(&target.path) {
        builder.remove_entry(stale.hash, &stale.path);
    }
    match candidates.iter().find(|c| c.catalogued && !c.exists) {
        Some(vanished) => {
            info!("Moved: {} -> {}", vanished.path.display(), target.path.display());
            builder.update_path(hash, &vanished.path, &target.path, target.size);
        }
        None => {
            builder.add_entry(CatalogEntry::new(hash, &target.path, target.size));
        }
    }
}

fn prune_missing(
    builder: &mut PlanBuilder<'_>,
    catalog: &Catalog,
    roots: &[PathBuf],
    seen: &HashSet<ContentHash>,
    ctx: &ReconcileContext<'_>,
) {
    let under_roots = |path: &Path| roots.iter().any(|root| path.starts_with(root));
    for entry in catalog.entries() {
        if seen.contains(&entry.hash) || !under_roots(&entry.path) || ctx.fs.exists(&entry.path) {
            continue;
        }
        debug!("Pruning missing {} {}", entry.hash, entry.path.display());
        builder.remove_entry(entry.hash, &entry.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFs;
    use crate::hasher::xxhash::hash_data;
    use crate::plan::Action;
    use crate::progress::SilentReporter;
    use crate::resolve::UnattendedResolver;
    use std::fs;
    use tempfile::tempdir;

    fn ctx() -> ReconcileContext<'static> {
        ReconcileContext {
            fs: &LocalFs,
            reporter: &SilentReporter,
        }
    }

    fn events<P: AsRef<Path>>(paths: &[P]) -> Vec<ScanEvent> {
        paths
            .iter()
            .map(|p| {
                let path = p.as_ref();
                ScanEvent::Candidate(ScanCandidate::new(path, fs::metadata(path).unwrap().len()))
            })
            .collect()
    }

    fn run<P: AsRef<Path>>(catalog: &Catalog, paths: &[P], roots: &[PathBuf], options: &RepairOptions) -> Reconciliation {
        repair(
            catalog,
            events(paths),
            roots,
            &ctx(),
            &mut UnattendedResolver::new(true),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_move_updates_path() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("moved").join("new.txt");
        fs::create_dir_all(new.parent().unwrap()).unwrap();
        fs::write(&new, "payload").unwrap();
        let hash = hash_data(b"payload");
        let catalog: Catalog = vec![CatalogEntry::new(hash, &old, 7)].into_iter().collect();

        let result = run(&catalog, &[&new], &[dir.path().to_path_buf()], &RepairOptions::default());

        assert_eq!(
            result.plan.actions(),
            &[Action::UpdateCatalogPath {
                hash,
                from: old,
                to: new,
                size: 7
            }]
        );
    }

    #[test]
    fn test_copy_is_not_a_move() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let copy = dir.path().join("copy.txt");
        fs::write(&old, "payload").unwrap();
        fs::write(&copy, "payload").unwrap();
        let catalog: Catalog = vec![CatalogEntry::new(hash_data(b"payload"), &old, 7)]
            .into_iter()
            .collect();

        let result = run(&catalog, &[&copy, &old], &[dir.path().to_path_buf()], &RepairOptions::default());

        assert!(result.plan.is_empty());
        assert_eq!(result.outcome.unresolved.len(), 1);
        assert_eq!(result.outcome.unresolved[0].candidates.len(), 2);
    }

    #[test]
    fn test_two_new_paths_for_one_vanished_entry_escalate() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "payload").unwrap();
        fs::write(&b, "payload").unwrap();
        let catalog: Catalog = vec![CatalogEntry::new(hash_data(b"payload"), dir.path().join("gone.txt"), 7)]
            .into_iter()
            .collect();

        let result = run(&catalog, &[&a, &b], &[dir.path().to_path_buf()], &RepairOptions::default());
        assert!(result.plan.is_empty());
        assert_eq!(result.outcome.unresolved.len(), 1);
    }

    #[test]
    fn test_operator_choice_updates_vanished_entry() {
        struct PickSecondNew;
        impl ConflictResolver for PickSecondNew {
            fn resolve(&mut self, case: &ConflictCase) -> Result<Decision> {
                Ok(Decision::Keep(case.candidates.len() - 1))
            }
            fn confirm_deletions(&mut self, _paths: &[PathBuf]) -> Result<bool> {
                Ok(false)
            }
        }

        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "payload").unwrap();
        fs::write(&b, "payload").unwrap();
        let hash = hash_data(b"payload");
        let catalog: Catalog = vec![CatalogEntry::new(hash, &gone, 7)].into_iter().collect();

        let result = repair(
            &catalog,
            events(&[&a, &b]),
            &[dir.path().to_path_buf()],
            &ctx(),
            &mut PickSecondNew,
            &RepairOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.plan.actions(),
            &[Action::UpdateCatalogPath {
                hash,
                from: gone,
                to: b,
                size: 7
            }]
        );
        assert_eq!(result.plan.deletions().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_record_is_a_path_correction() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("song.flac"), "audio").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let hash = hash_data(b"audio");
        let catalog: Catalog = vec![CatalogEntry::new(hash, link.join("song.flac"), 5)]
            .into_iter()
            .collect();

        let result = run(&catalog, &[real.join("song.flac")], &[dir.path().to_path_buf()], &RepairOptions::default());

        assert_eq!(
            result.plan.actions(),
            &[Action::UpdateCatalogPath {
                hash,
                from: link.join("song.flac"),
                to: real.join("song.flac"),
                size: 5
            }]
        );
        assert!(result.outcome.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_content_is_unmatched() {
        let dir = tempdir().unwrap();
        let stranger = dir.path().join("stranger.txt");
        fs::write(&stranger, "never seen").unwrap();

        let result = run(&Catalog::new(), &[&stranger], &[dir.path().to_path_buf()], &RepairOptions::default());
        assert!(result.plan.is_empty());
        assert_eq!(result.outcome.unmatched, vec![stranger]);
    }

    #[test]
    fn test_prune_only_when_asked_and_only_under_roots() {
        let dir = tempdir().unwrap();
        let inside = dir.path().join("gone.txt");
        let outside = PathBuf::from("/somewhere/else/gone.txt");
        let catalog: Catalog = vec![
            CatalogEntry::new(ContentHash(1), &inside, 3),
            CatalogEntry::new(ContentHash(2), &outside, 3),
        ]
        .into_iter()
        .collect();
        let roots = vec![dir.path().to_path_buf()];

        let default_run = run::<&Path>(&catalog, &[], &roots, &RepairOptions::default());
        assert!(default_run.plan.is_empty());

        let options = RepairOptions {
            prune_missing: true,
            ..RepairOptions::default()
        };
        let pruned = run::<&Path>(&catalog, &[], &roots, &options);
        assert_eq!(
            pruned.plan.actions(),
            &[Action::RemoveCatalogEntry {
                hash: ContentHash(1),
                path: inside
            }]
        );
    }

    #[test]
    fn test_prune_spares_content_seen_elsewhere() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        let other = dir.path().join("other.txt");
        let present = dir.path().join("present.txt");
        fs::write(&present, "here").unwrap();
        fs::write(&other, "here").unwrap();
        let hash = hash_data(b"here");
        let catalog: Catalog = vec![CatalogEntry::new(hash, &gone, 4), CatalogEntry::new(hash, &present, 4)]
            .into_iter()
            .collect();

        let options = RepairOptions {
            prune_missing: true,
            ..RepairOptions::default()
        };
        let result = run(&catalog, &[&present, &other], &[dir.path().to_path_buf()], &options);

        assert!(!result
            .plan
            .actions()
            .iter()
            .any(|a| matches!(a, Action::RemoveCatalogEntry { .. })));
    }
}
