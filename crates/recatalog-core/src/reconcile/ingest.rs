use super::{
    conflict_candidates, fresh_members, group_by_hash, plan_alias_corrections, resolve_identities,
    split_aliases, AliasSplit, IdentityOptions, Mode, Outcome, ReconcileContext, Reconciliation,
};
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::plan::PlanBuilder;
use crate::resolve::{ConflictCandidate, ConflictCase, ConflictResolver, Decision};
use crate::scanner::ScanEvent;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub favored_paths: Vec<PathBuf>,
    /// Never delete a file that was catalogued before this run.
    pub protect_catalogued: bool,
}

impl IngestOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            favored_paths: config.favored_paths.iter().map(PathBuf::from).collect(),
            protect_catalogued: false,
        }
    }
}

/// Mode A: catalogue new content and resolve duplicates.
///
/// Entries for files outside the scan are never touched. Deletions are only
/// planned, confirmed once at the end, and left to the executor.
pub fn ingest<I>(
    catalog: &Catalog,
    events: I,
    ctx: &ReconcileContext<'_>,
    resolver: &mut dyn ConflictResolver,
    options: &IngestOptions,
) -> Result<Reconciliation>
where
    I: IntoIterator<Item = ScanEvent>,
{
    let resolution = resolve_identities(catalog, events, ctx, IdentityOptions::default());
    let mut outcome = Outcome::new(Mode::Ingest, &resolution);
    let mut builder = PlanBuilder::new().guarded_by(ctx.fs);

    for group in group_by_hash(&resolution.identified) {
        let hash = group.hash;
        let fresh = fresh_members(catalog, &group);
        if fresh.is_empty() {
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

        if catalogued.is_empty() && fresh.len() == 1 {
            let candidate = fresh[0];
            let Some(previous) = catalog.lookup_by_path(&candidate.path) else {
                builder.add_entry(CatalogEntry::new(hash, &candidate.path, candidate.size));
                continue;
            };

            // same path, new content
            let case = ConflictCase::path_hash_mismatch(
                Mode::Ingest,
                hash,
                ConflictCandidate {
                    path: candidate.path.clone(),
                    size: candidate.size,
                    catalogued: false,
                    exists: true,
                },
                previous.clone(),
            );
            match resolver.resolve(&case)? {
                Decision::Keep(_) => {
                    builder.remove_entry(previous.hash, &previous.path);
                    builder.add_entry(CatalogEntry::new(hash, &candidate.path, candidate.size));
                }
                Decision::Skip => outcome.unresolved.push(case),
                Decision::Abort => return Err(Error::Cancelled),
            }
            continue;
        }

        let case = ConflictCase::duplicate(
            Mode::Ingest,
            hash,
            conflict_candidates(&catalogued, &fresh, ctx.fs),
            &options.favored_paths,
        );
        match resolver.resolve(&case)? {
            Decision::Keep(index) if index < case.candidates.len() => {
                plan_keep(&mut builder, catalog, &case, index, options.protect_catalogued);
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

    let deletions = builder.deletion_targets();
    if !deletions.is_empty() && !resolver.confirm_deletions(&deletions)? {
        info!("{} deletions declined; catalog changes kept", deletions.len());
        builder = builder.without_deletions();
        outcome.deletions_declined = true;
    }

    let plan = builder.finish();
    info!(
        "Ingest planned {} actions ({} deletions), {} conflicts unresolved",
        plan.len(),
        plan.deletions().count(),
        outcome.unresolved.len()
    );
    Ok(Reconciliation { plan, outcome })
}

fn plan_keep(
    builder: &mut PlanBuilder<'_>,
    catalog: &Catalog,
    case: &ConflictCase,
    keep: usize,
    protect_catalogued: bool,
) {
    let keeper = &case.candidates[keep];
    debug!("Keeping {} for {}", keeper.path.display(), case.hash);

    if keeper.catalogued {
        builder.keep(&keeper.path);
    } else {
        if let Some(previous) = catalog.lookup_by_path(&keeper.path) {
            builder.remove_entry(previous.hash, &previous.path);
        }
        // A catalogued copy that vanished is a move; one still on disk stays
        // recorded until its deletion succeeds.
        match case.candidates.iter().find(|c| c.catalogued && !c.exists) {
            Some(vanished) => {
                builder.update_path(case.hash, &vanished.path, &keeper.path, keeper.size);
            }
            None => {
                builder.add_entry(CatalogEntry::new(case.hash, &keeper.path, keeper.size));
            }
        }
    }

    for (index, other) in case.candidates.iter().enumerate() {
        if index == keep {
            continue;
        }
        if other.catalogued && (!other.exists || protect_catalogued) {
            continue;
        }
        builder.delete_file(&other.path);
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
    use crate::scanner::ScanCandidate;
    use std::fs;
    use std::path::Path;
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

    /// Always picks the last candidate, and records what it saw.
    #[derive(Default)]
    struct PickLast {
        seen: Vec<ConflictCase>,
        confirm: bool,
    }

    impl ConflictResolver for PickLast {
        fn resolve(&mut self, case: &ConflictCase) -> Result<Decision> {
            self.seen.push(case.clone());
            Ok(Decision::Keep(case.candidates.len() - 1))
        }

        fn confirm_deletions(&mut self, _paths: &[PathBuf]) -> Result<bool> {
            Ok(self.confirm)
        }
    }

    #[test]
    fn test_new_file_is_added() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();

        let result = ingest(
            &Catalog::new(),
            events(&[&file]),
            &ctx(),
            &mut UnattendedResolver::new(true),
            &IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.plan.actions(),
            &[Action::AddCatalogEntry {
                entry: CatalogEntry::new(hash_data(b"alpha"), &file, 5)
            }]
        );
    }

    #[test]
    fn test_duplicate_of_catalogued_deletes_candidate() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("original.txt");
        let copy = dir.path().join("copy.txt");
        fs::write(&original, "same").unwrap();
        fs::write(&copy, "same").unwrap();
        let catalog: Catalog = vec![CatalogEntry::new(hash_data(b"same"), &original, 4)]
            .into_iter()
            .collect();

        let result = ingest(
            &catalog,
            events(&[&copy, &original]),
            &ctx(),
            &mut UnattendedResolver::new(true),
            &IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(result.plan.actions(), &[Action::DeleteFile { path: copy }]);
    }

    #[test]
    fn test_keeping_new_copy_adds_and_deletes_old() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("original.txt");
        let copy = dir.path().join("copy.txt");
        fs::write(&original, "same").unwrap();
        fs::write(&copy, "same").unwrap();
        let hash = hash_data(b"same");
        let catalog: Catalog = vec![CatalogEntry::new(hash, &original, 4)].into_iter().collect();

        let mut resolver = PickLast {
            confirm: true,
            ..PickLast::default()
        };
        let result = ingest(&catalog, events(&[&copy]), &ctx(), &mut resolver, &IngestOptions::default())
            .unwrap();

        assert_eq!(
            result.plan.actions(),
            &[
                Action::AddCatalogEntry {
                    entry: CatalogEntry::new(hash, &copy, 4)
                },
                Action::DeleteFile { path: original },
            ]
        );
    }

    #[test]
    fn test_protected_catalogued_file_never_deleted() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("original.txt");
        let copy = dir.path().join("copy.txt");
        fs::write(&original, "same").unwrap();
        fs::write(&copy, "same").unwrap();
        let hash = hash_data(b"same");
        let catalog: Catalog = vec![CatalogEntry::new(hash, &original, 4)].into_iter().collect();

        let mut resolver = PickLast {
            confirm: true,
            ..PickLast::default()
        };
        let options = IngestOptions {
            protect_catalogued: true,
            ..IngestOptions::default()
        };
        let result = ingest(&catalog, events(&[&copy]), &ctx(), &mut resolver, &options).unwrap();
        assert_eq!(result.plan.deletions().count(), 0);
    }

    #[test]
    fn test_three_way_duplicates_escalate_once() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        for path in &paths {
            fs::write(path, "triple").unwrap();
        }

        let mut resolver = PickLast {
            confirm: true,
            ..PickLast::default()
        };
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let result = ingest(&Catalog::new(), events(&refs), &ctx(), &mut resolver, &IngestOptions::default())
            .unwrap();

        assert_eq!(resolver.seen.len(), 1);
        assert_eq!(resolver.seen[0].candidates.len(), 3);
        let adds: Vec<_> = result
            .plan
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::AddCatalogEntry { .. }))
            .collect();
        assert_eq!(adds.len(), 1);
        assert_eq!(result.plan.deletions().count(), 2);
    }

    #[test]
    fn test_declined_confirmation_drops_deletions_only() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "pair").unwrap();
        fs::write(&b, "pair").unwrap();

        let result = ingest(
            &Catalog::new(),
            events(&[&a, &b]),
            &ctx(),
            &mut UnattendedResolver::new(false),
            &IngestOptions::default(),
        )
        .unwrap();

        assert!(result.outcome.deletions_declined);
        assert_eq!(result.plan.deletions().count(), 0);
        assert_eq!(result.plan.len(), 1);
    }

    #[test]
    fn test_modified_in_place_recatalogued() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        fs::write(&file, "version two").unwrap();
        let old = CatalogEntry::new(hash_data(b"v1"), &file, 2);
        let catalog: Catalog = vec![old.clone()].into_iter().collect();

        let result = ingest(
            &catalog,
            events(&[&file]),
            &ctx(),
            &mut UnattendedResolver::new(true),
            &IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.plan.actions(),
            &[
                Action::RemoveCatalogEntry {
                    hash: old.hash,
                    path: file.clone()
                },
                Action::AddCatalogEntry {
                    entry: CatalogEntry::new(hash_data(b"version two"), &file, 11)
                },
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_catalogued_file_seen_through_symlink_is_repointed_not_deleted() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("movie.mkv"), "frames").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let hash = hash_data(b"frames");
        let catalog: Catalog = vec![CatalogEntry::new(hash, link.join("movie.mkv"), 6)]
            .into_iter()
            .collect();

        let result = ingest(
            &catalog,
            events(&[real.join("movie.mkv")]),
            &ctx(),
            &mut UnattendedResolver::new(true),
            &IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.plan.actions(),
            &[Action::UpdateCatalogPath {
                hash,
                from: link.join("movie.mkv"),
                to: real.join("movie.mkv"),
                size: 6
            }]
        );
        assert!(result.outcome.unresolved.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_real_copy_beside_symlinked_original_still_deduplicated() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("movie.mkv"), "frames").unwrap();
        fs::write(dir.path().join("copy.mkv"), "frames").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let hash = hash_data(b"frames");
        let catalog: Catalog = vec![CatalogEntry::new(hash, link.join("movie.mkv"), 6)]
            .into_iter()
            .collect();

        let result = ingest(
            &catalog,
            events(&[real.join("movie.mkv"), dir.path().join("copy.mkv")]),
            &ctx(),
            &mut UnattendedResolver::new(true),
            &IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(
            result.plan.deletions().collect::<Vec<_>>(),
            vec![dir.path().join("copy.mkv").as_path()]
        );
        assert!(real.join("movie.mkv").exists());
    }

    #[test]
    fn test_abort_cancels() {
        struct Quitter;
        impl ConflictResolver for Quitter {
            fn resolve(&mut self, _case: &ConflictCase) -> Result<Decision> {
                Ok(Decision::Abort)
            }
            fn confirm_deletions(&mut self, _paths: &[PathBuf]) -> Result<bool> {
                Ok(true)
            }
        }

        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "pair").unwrap();
        fs::write(&b, "pair").unwrap();

        let result = ingest(&Catalog::new(), events(&[&a, &b]), &ctx(), &mut Quitter, &IngestOptions::default());
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
