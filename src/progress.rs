//! Progress reporting for a run
//!
//! Provides a live spinner using indicatif and the end-of-run summary.
//! Both go to stderr; stdout carries only result lines.

use crate::launcher::RunReport;
use crate::walker::RunProgress;
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays run status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());

        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &RunProgress) {
        let msg = format!(
            "Queued: {} | Done: {} | Rate: {:.0}/s | Queue: {} | Workers: {}",
            format_number(progress.files_queued),
            format_number(progress.files_done),
            progress.files_per_second(),
            progress.queue_size,
            progress.total_workers,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        if !self.bar.is_finished() {
            self.bar.finish_with_message(message.to_string());
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);

    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a summary of the run to stderr
pub fn print_summary(report: &RunReport) {
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        report.files as f64 / duration_secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("{}", style("Run Complete").green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Files:").bold(), format_number(report.files));
    if let Some(records) = report.records {
        eprintln!("  {} {}", style("Records:").bold(), format_number(records));
    }
    eprintln!("  {} {}", style("Values:").bold(), format_number(report.values));
    eprintln!("  {} {}", style("Workers:").bold(), report.workers);
    eprintln!("  {} {}", style("Collector:").bold(), report.mode);
    eprintln!(
        "  {} {:.1}s ({:.0} files/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    eprintln!();
}

/// Print a header at the start of the run
pub fn print_header(root: &str, workers: usize, collector: &str) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("datstat").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Source:").bold(), root);
    eprintln!("  {} {}", style("Workers:").bold(), workers);
    eprintln!("  {} {}", style("Collector:").bold(), collector);
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
