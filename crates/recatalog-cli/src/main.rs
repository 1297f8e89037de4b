mod commands;
mod logging;
mod progress;
mod prompt;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RunArgs};
use dotenv::dotenv;
use progress::CliReporter;
use prompt::PromptResolver;
use recatalog_core::{
    AuditFinding, AuditReport, CatalogEngine, ConflictResolver, DryRunExecutor, Error, Executor, IngestOptions,
    LocalExecutor, LocalFs, RepairOptions, RunSummary, UnattendedResolver,
};
use tracing::{error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_DELETE_FAILED: i32 = 2;

fn main() {
    dotenv().ok();

    let guard = logging::init_logger();
    let args = Cli::parse();

    let code = match run(args) {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(Error::Cancelled) => warn!("{}", err),
                _ => error!("Error: {}", err),
            }
            EXIT_FATAL
        }
    };

    drop(guard);
    process::exit(code);
}

fn run(args: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let config = recatalog_core::config::load_configuration()?;
    let mut engine = CatalogEngine::new(config.clone());
    if let Some(path) = args.catalog {
        engine = engine.with_catalog_path(path);
    }

    match args.command {
        Some(Commands::Ingest {
            run,
            ignore_catalog_dupes,
            favored,
        }) => {
            let mut options = IngestOptions::from_config(&config);
            options.protect_catalogued = ignore_catalog_dupes;
            options
                .favored_paths
                .extend(favored.into_iter().map(PathBuf::from));

            let reporter = CliReporter::new();
            let (mut resolver, executor) = collaborators(&run);
            let summary = engine.ingest(
                &run.roots,
                resolver.as_mut(),
                executor.as_ref(),
                &options,
                &reporter,
            )?;
            Ok(report_run(&summary, &engine))
        }
        Some(Commands::Repair {
            run,
            prune_missing,
            infer_by_size,
        }) => {
            let options = RepairOptions {
                prune_missing,
                infer_by_size,
                ..RepairOptions::from_config(&config)
            };

            let reporter = CliReporter::new();
            let (mut resolver, executor) = collaborators(&run);
            let summary = engine.repair(
                &run.roots,
                resolver.as_mut(),
                executor.as_ref(),
                &options,
                &reporter,
            )?;
            Ok(report_run(&summary, &engine))
        }
        Some(Commands::Audit { roots, output }) => {
            let reporter = CliReporter::new();
            let report = engine.audit(&roots, &reporter)?;
            print_audit(&report);
            if let Some(path) = output {
                let writer = BufWriter::new(File::create(&path)?);
                serde_json::to_writer_pretty(writer, &report)?;
                info!("Audit report written to {}", path.display());
            }
            Ok(EXIT_OK)
        }
        Some(Commands::Stats) => {
            let stats = engine.stats()?;
            info!("Catalog: {}", engine.catalog_path().display());
            info!(
                "{} entries, {} distinct hashes, {} bytes",
                format!("{}", stats.entries).cyan(),
                format!("{}", stats.distinct_hashes).cyan(),
                format!("{}", stats.total_bytes).cyan(),
            );
            Ok(EXIT_OK)
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            println!("Catalog file: {}", engine.catalog_path().display());
            Ok(EXIT_OK)
        }
        None => {
            Cli::command().print_long_help()?;
            Ok(EXIT_OK)
        }
    }
}

fn collaborators(run: &RunArgs) -> (Box<dyn ConflictResolver>, Box<dyn Executor>) {
    let resolver: Box<dyn ConflictResolver> = if run.yes {
        Box::new(UnattendedResolver::new(true))
    } else {
        Box::new(PromptResolver::stdio())
    };
    let executor: Box<dyn Executor> = if run.dry_run {
        Box::new(DryRunExecutor)
    } else {
        Box::new(LocalExecutor::new(&LocalFs))
    };
    (resolver, executor)
}

fn report_run(summary: &RunSummary, engine: &CatalogEngine) -> i32 {
    let outcome = &summary.outcome;
    let execution = &summary.execution;

    println!();
    info!(
        "{}: {} scanned, {} trusted, {} hashed",
        outcome.mode,
        format!("{}", outcome.scanned).green(),
        format!("{}", outcome.trusted).green(),
        format!("{}", outcome.hashed).green(),
    );
    info!(
        "{} added, {} updated, {} removed, {} deleted{}",
        format!("{}", execution.added).cyan(),
        format!("{}", execution.updated).cyan(),
        format!("{}", execution.removed).cyan(),
        format!("{}", execution.deleted).red(),
        if execution.dry_run { " (dry run)" } else { "" },
    );

    for issue in &outcome.issues {
        warn!("Skipped {}", issue);
    }
    for path in &outcome.unmatched {
        info!("Not in catalog: {}", path.display());
    }
    if !outcome.unresolved.is_empty() {
        warn!(
            "{} conflicts left unresolved",
            format!("{}", outcome.unresolved.len()).yellow()
        );
        for case in &outcome.unresolved {
            let paths: Vec<String> = case.paths().map(|p| p.display().to_string()).collect();
            warn!("  {} {}: {}", case.kind, case.hash, paths.join(", "));
        }
    }
    if outcome.deletions_declined {
        info!("Deletions declined; catalog changes were still applied");
    }
    if execution.missing > 0 {
        warn!("{} deletion targets were already gone", execution.missing);
    }

    if summary.has_failures() {
        for failure in &execution.failures {
            error!("Could not delete {}: {}", failure.path.display(), failure.message);
        }
        error!(
            "{} deletions failed; their catalog entries in {} were kept",
            format!("{}", execution.failures.len()).red(),
            engine.catalog_path().display()
        );
        return EXIT_DELETE_FAILED;
    }
    EXIT_OK
}

fn print_audit(report: &AuditReport) {
    let counts = report.counts();

    println!();
    for finding in report.renamed() {
        if let AuditFinding::RenamedMatch {
            path,
            previous_path,
            previous_exists,
            modified,
            ..
        } = finding
        {
            info!(
                "Renamed: {} -> {}{}{}",
                previous_path.display(),
                path.display(),
                if *previous_exists { " (original still present)" } else { "" },
                if *modified { " (path previously held other content)" } else { "" },
            );
        }
    }
    for finding in report.unmatched() {
        info!("New: {}", finding.path().display());
    }
    for issue in &report.issues {
        warn!("Skipped {}", issue);
    }
    info!(
        "{} cataloged, {} modified, {} renamed, {} new, {} skipped",
        format!("{}", counts.cataloged).green(),
        format!("{}", counts.modified).yellow(),
        format!("{}", counts.renamed).cyan(),
        format!("{}", counts.unmatched).cyan(),
        format!("{}", counts.issues).red(),
    );
}
