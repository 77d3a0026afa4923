//! Terminal output helpers: spinners, progress bars, summary rendering.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use vaultctl::common::OperationSummary;

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Bar tracking completed batches out of a known total.
pub fn batch_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}

/// Spinner showing received bytes. The declared total may be absent, so
/// the display never promises a length it cannot know.
pub fn byte_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {bytes} received")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_spinner_success(spinner: &ProgressBar, msg: &str) {
    spinner.finish_with_message(format!("{} {}", style("✓").green().bold(), msg));
}

pub fn finish_spinner_error(spinner: &ProgressBar, msg: &str) {
    spinner.finish_with_message(format!("{} {}", style("✗").red().bold(), msg));
}

pub fn print_success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

pub fn print_summary(label: &str, summary: &OperationSummary) {
    if summary.success() {
        print_success(&format!(
            "{label}: {}/{} succeeded, {} files, {:.1} MB in {:.1}s ({:.1} MB/s)",
            summary.succeeded,
            summary.total,
            summary.total_files,
            summary.total_bytes as f64 / (1024.0 * 1024.0),
            summary.duration.as_secs_f64(),
            summary.throughput_mb_per_sec(),
        ));
    } else {
        print_error(&format!(
            "{label}: {}/{} failed ({:.0}% succeeded)",
            summary.failed,
            summary.total,
            summary.success_rate() * 100.0,
        ));
        for error in &summary.errors {
            eprintln!("  {error}");
        }
    }
}
