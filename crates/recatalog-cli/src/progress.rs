use indicatif::{ProgressBar, ProgressStyle};
use recatalog_core::ProgressReporter;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan phase: spinner (unknown total files upfront)
/// - Hash phase: progress bar over the files that need hashing
/// - Execute phase: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Hide the active bar so a prompt can use the terminal.
    pub fn suspend(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn spinner(&self, message: &'static str) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICKS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning files...");
    }

    fn on_scan_progress(&self, files_found: usize, _current_path: &Path) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_message(format!("Scanning... {} files found", files_found));
        }
    }

    fn on_scan_complete(&self, total_files: usize, trusted: usize, duration_secs: f64) {
        self.suspend();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} files ({} already catalogued) in {:.2}s",
            total_files, trusted, duration_secs
        );
    }

    fn on_hash_start(&self, total_files: usize) {
        let pb = ProgressBar::new(total_files as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Hashing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICKS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_hash_progress(&self, files_hashed: usize, total_files: usize) {
        if let Some(pb) = self.lock().as_ref() {
            if pb.length() != Some(total_files as u64) {
                pb.set_length(total_files as u64);
            }
            pb.set_position(files_hashed as u64);
        }
    }

    fn on_hash_complete(&self, total_files: usize) {
        self.suspend();
        eprintln!("  \x1b[32m✓\x1b[0m Hash complete: {} files", total_files);
    }

    fn on_execute_start(&self, actions: usize) {
        if actions > 0 {
            self.spinner("Applying changes...");
        }
    }

    fn on_execute_complete(&self, applied: usize, failed: usize) {
        self.suspend();
        if failed > 0 {
            eprintln!(
                "  \x1b[33m!\x1b[0m Applied {} changes, {} deletions failed",
                applied, failed
            );
        } else {
            eprintln!("  \x1b[32m✓\x1b[0m Applied {} changes", applied);
        }
    }
}
