//! Progress reporting shared by all extraction tasks.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Redraws per second, roughly one frame every 65ms.
const REFRESH_RATE: u8 = 15;

/// Reporter handed to every extraction task.
///
/// Wraps a progress bar drawn on stderr and counts outcomes atomically, so
/// tasks on any worker thread may report through a shared reference. Log lines
/// go through the reporter, which hides the bar while they print.
pub struct Progress {
    bar: ProgressBar,
    extracted: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Progress {
    /// Creates a bar of `total` steps on stderr.
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::with_draw_target(
            Some(total),
            ProgressDrawTarget::stderr_with_hz(REFRESH_RATE),
        );
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} {msg} [{wide_bar}] {pos}/{len} ({per_sec}) {elapsed}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_message("Extracting files...");
        Self::with_bar(bar)
    }

    /// Creates a reporter that counts but never draws.
    pub fn hidden(total: u64) -> Self {
        Self::with_bar(ProgressBar::with_draw_target(
            Some(total),
            ProgressDrawTarget::hidden(),
        ))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            extracted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub fn entry_extracted(&self, entry: &str, path: &Path) {
        self.extracted.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
        tracing::debug!(entry, path = %path.display(), "extracted");
    }

    pub fn entry_failed(&self, entry: &str, error: &anyhow::Error) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.bar.suspend(|| {
            tracing::error!("Error extracting {entry}: {error:#}");
        });
    }

    pub fn entry_skipped(&self, entry: &str, reason: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.bar.suspend(|| {
            tracing::warn!("Skipping {entry}: {reason}");
        });
    }

    pub fn info(&self, message: &str) {
        self.bar.suspend(|| tracing::info!("{message}"));
    }

    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Leaves the bar at its final position and ends the line.
    pub fn finish(&self) {
        self.bar.abandon();
    }
}
