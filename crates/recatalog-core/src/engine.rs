use crate::catalog::{Catalog, CatalogStats, CatalogStore};
use crate::config::AppConfig;
use crate::error::Result;
use crate::execute::Executor;
use crate::filesystem::{FileSystem, LocalFs};
use crate::progress::ProgressReporter;
use crate::reconcile::{
    self, AuditReport, IngestOptions, ReconcileContext, Reconciliation, RepairOptions, RunSummary,
};
use crate::resolve::ConflictResolver;
use crate::scanner::Scanner;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Runs one reconciliation against the catalog file: load, scan, decide,
/// execute, persist.
pub struct CatalogEngine {
    config: AppConfig,
    catalog_path: PathBuf,
    fs: Box<dyn FileSystem>,
}

impl CatalogEngine {
    pub fn new(config: AppConfig) -> Self {
        let catalog_path = config.catalog_path();
        Self {
            config,
            catalog_path,
            fs: Box::new(LocalFs),
        }
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Filesystem used for existence checks and hashing. Deletions go through
    /// the executor.
    pub fn with_filesystem(mut self, fs: Box<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn load_catalog(&self) -> Result<Catalog> {
        let start = Instant::now();
        let catalog = CatalogStore::load(&self.catalog_path)?;
        debug!(
            "Loaded {} catalog entries from {} in {:.2}s",
            catalog.len(),
            self.catalog_path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(catalog)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        Ok(self.load_catalog()?.stats())
    }

    /// Mode A over `roots` (config roots, else the current directory, when empty).
    pub fn ingest(
        &self,
        roots: &[String],
        resolver: &mut dyn ConflictResolver,
        executor: &dyn Executor,
        options: &IngestOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut catalog = self.load_catalog()?;
        let scanner = self.scanner(roots);
        let (resolved, missing) = scanner.resolve_roots();
        let ctx = self.context(reporter);

        info!("Ingesting {:?}", resolved);
        let start = Instant::now();
        let events = scanner.scan_resolved(resolved, missing);
        let reconciliation = reconcile::ingest(&catalog, events, &ctx, resolver, options)?;
        debug!("Ingest decided in {:.2}s", start.elapsed().as_secs_f64());

        self.finish(started_at, reconciliation, &mut catalog, executor, reporter)
    }

    /// Mode B over `roots`. Never deletes files.
    pub fn repair(
        &self,
        roots: &[String],
        resolver: &mut dyn ConflictResolver,
        executor: &dyn Executor,
        options: &RepairOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut catalog = self.load_catalog()?;
        let scanner = self.scanner(roots);
        let (resolved, missing) = scanner.resolve_roots();
        let ctx = self.context(reporter);

        info!("Repairing locations under {:?}", resolved);
        let start = Instant::now();
        let events = scanner.scan_resolved(resolved.clone(), missing);
        let reconciliation = reconcile::repair(&catalog, events, &resolved, &ctx, resolver, options)?;
        debug!("Repair decided in {:.2}s", start.elapsed().as_secs_f64());

        self.finish(started_at, reconciliation, &mut catalog, executor, reporter)
    }

    /// Mode C over `roots`. The catalog file is only read.
    pub fn audit(&self, roots: &[String], reporter: &dyn ProgressReporter) -> Result<AuditReport> {
        let catalog = self.load_catalog()?;
        let scanner = self.scanner(roots);
        let (resolved, missing) = scanner.resolve_roots();
        let ctx = self.context(reporter);

        info!("Auditing {:?}", resolved);
        let start = Instant::now();
        let report = reconcile::audit(&catalog, scanner.scan_resolved(resolved, missing), &ctx);
        debug!("Audit completed in {:.2}s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    fn context<'a>(&'a self, reporter: &'a dyn ProgressReporter) -> ReconcileContext<'a> {
        ReconcileContext {
            fs: self.fs.as_ref(),
            reporter,
        }
    }

    fn scanner(&self, roots: &[String]) -> Scanner {
        let roots = if !roots.is_empty() {
            roots.to_vec()
        } else if !self.config.root_paths.is_empty() {
            self.config.root_paths.clone()
        } else {
            vec![".".to_string()]
        };
        Scanner::new(&roots, &self.config.ignore_patterns).excluding(&self.catalog_path)
    }

    fn finish(
        &self,
        started_at: chrono::DateTime<Utc>,
        reconciliation: Reconciliation,
        catalog: &mut Catalog,
        executor: &dyn Executor,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let Reconciliation { plan, outcome } = reconciliation;

        let start = Instant::now();
        let execution = executor.execute(plan, catalog, reporter);
        debug!("Plan executed in {:.2}s", start.elapsed().as_secs_f64());

        if execution.dry_run {
            info!("Dry run: catalog not written");
        } else if execution.applied() > 0 {
            let start = Instant::now();
            CatalogStore::save(catalog, &self.catalog_path)?;
            debug!(
                "Saved {} entries to {} in {:.2}s",
                catalog.len(),
                self.catalog_path.display(),
                start.elapsed().as_secs_f64()
            );
        } else {
            debug!("Catalog unchanged, not rewritten");
        }

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            outcome,
            execution,
        })
    }
}
