pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod execute;
pub mod filesystem;
pub mod hasher;
pub mod plan;
pub mod progress;
pub mod reconcile;
pub mod resolve;
pub mod scanner;

pub use catalog::{Catalog, CatalogEntry, CatalogStats, CatalogStore};
pub use config::AppConfig;
pub use engine::CatalogEngine;
pub use error::{Error, Result};
pub use execute::{DryRunExecutor, ExecutionReport, Executor, LocalExecutor};
pub use filesystem::{FileSystem, LocalFs};
pub use hasher::ContentHash;
pub use plan::{Action, MutationPlan};
pub use progress::{ProgressReporter, SilentReporter};
pub use reconcile::{AuditFinding, AuditReport, IngestOptions, Mode, RepairOptions, RunSummary};
pub use resolve::{ConflictCase, ConflictKind, ConflictResolver, Decision, UnattendedResolver};
