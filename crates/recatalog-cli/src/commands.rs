use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "recatalog")]
#[command(about = "Content-addressed file catalog: ingest, dedupe, repair moves, audit", long_about = None)]
pub struct Cli {
    /// Catalog file to use instead of $CATALOG_DB_PATH/catalog.db
    #[arg(long, global = true, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directories to scan (default: configured root_paths, else .)
    pub roots: Vec<String>,
    /// Decide every conflict unattended and allow deletions without asking
    #[arg(short, long)]
    pub yes: bool,
    /// Plan and report, but change nothing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Catalog new files and remove duplicates of known content
    Ingest {
        #[command(flatten)]
        run: RunArgs,
        /// Never delete a file that is already catalogued
        #[arg(long)]
        ignore_catalog_dupes: bool,
        /// Path or directory to prefer when suggesting a keeper (repeatable)
        #[arg(long = "favor", value_name = "PATH")]
        favored: Vec<String>,
    },
    /// Follow catalogued files that were moved or renamed
    Repair {
        #[command(flatten)]
        run: RunArgs,
        /// Forget catalog entries under the roots whose file is gone
        #[arg(long)]
        prune_missing: bool,
        /// Assume the hash of the only catalog entry with the same size
        #[arg(long)]
        infer_by_size: bool,
    },
    /// Classify files against the catalog without changing anything
    Audit {
        /// Directories to scan (default: configured root_paths, else .)
        roots: Vec<String>,
        /// Write the full report as JSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print catalog statistics
    Stats,
    /// Print configuration values
    PrintConfig,
}
