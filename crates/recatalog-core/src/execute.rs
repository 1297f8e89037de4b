use crate::catalog::Catalog;
use crate::filesystem::FileSystem;
use crate::plan::{Action, MutationPlan};
use crate::progress::ProgressReporter;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// A file that could not be removed. Its catalog entry is retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub deleted: usize,
    /// Deletion targets that were already gone.
    pub missing: usize,
    /// Metadata actions that no longer matched the catalog.
    pub stale: usize,
    pub failures: Vec<DeleteFailure>,
    pub dry_run: bool,
}

impl ExecutionReport {
    pub fn applied(&self) -> usize {
        self.added + self.updated + self.removed + self.deleted
    }
}

/// Consumes a finished plan.
pub trait Executor {
    fn execute(
        &self,
        plan: MutationPlan,
        catalog: &mut Catalog,
        reporter: &dyn ProgressReporter,
    ) -> ExecutionReport;
}

/// Applies catalog changes first, then deletions.
///
/// A failed deletion never stops the remaining ones, and the catalog entry at
/// a path is only dropped once the file is actually gone.
pub struct LocalExecutor<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> LocalExecutor<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }
}

impl Executor for LocalExecutor<'_> {
    fn execute(
        &self,
        plan: MutationPlan,
        catalog: &mut Catalog,
        reporter: &dyn ProgressReporter,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        reporter.on_execute_start(plan.len());

        let mut deletions: Vec<PathBuf> = Vec::new();
        for action in plan.into_actions() {
            match action {
                Action::DeleteFile { path } => deletions.push(path),
                Action::UpdateCatalogPath { hash, from, to, size } => {
                    if catalog.update_path(hash, &from, &to, size) {
                        debug!("Catalog {}: {} -> {}", hash, from.display(), to.display());
                        report.updated += 1;
                    } else {
                        warn!("No catalog entry {} at {}, update skipped", hash, from.display());
                        report.stale += 1;
                    }
                }
                Action::AddCatalogEntry { entry } => {
                    debug!("Catalog add {} {}", entry.hash, entry.path.display());
                    if let Some(displaced) = catalog.insert(entry) {
                        warn!("Displaced catalog entry {} at {}", displaced.hash, displaced.path.display());
                    }
                    report.added += 1;
                }
                Action::RemoveCatalogEntry { hash, path } => {
                    if catalog.remove_entry(hash, &path).is_some() {
                        debug!("Catalog forget {} {}", hash, path.display());
                        report.removed += 1;
                    } else {
                        report.stale += 1;
                    }
                }
            }
        }

        for path in deletions {
            match self.fs.remove_file(&path) {
                Ok(()) => {
                    debug!("Removed: {}", path.display());
                    report.deleted += 1;
                    if catalog.remove_path(&path).is_some() {
                        report.removed += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("File '{}' no longer exists, nothing to delete", path.display());
                    report.missing += 1;
                }
                Err(e) => {
                    error!("Failed to remove '{}': {}", path.display(), e);
                    report.failures.push(DeleteFailure {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Plan executed: {} added, {} updated, {} removed, {} deleted, {} failed",
            report.added,
            report.updated,
            report.removed,
            report.deleted,
            report.failures.len()
        );
        reporter.on_execute_complete(report.applied(), report.failures.len());
        report
    }
}

/// Applies nothing; reports what the plan contains.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

impl Executor for DryRunExecutor {
    fn execute(
        &self,
        plan: MutationPlan,
        _catalog: &mut Catalog,
        _reporter: &dyn ProgressReporter,
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            dry_run: true,
            ..ExecutionReport::default()
        };
        for action in plan.actions() {
            info!("[dry run] {}", action);
            match action {
                Action::DeleteFile { .. } => report.deleted += 1,
                Action::UpdateCatalogPath { .. } => report.updated += 1,
                Action::AddCatalogEntry { .. } => report.added += 1,
                Action::RemoveCatalogEntry { .. } => report.removed += 1,
            }
        }
        report
    }
}
