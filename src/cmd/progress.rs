//! Progress bar and spinner utilities for report runs

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for paged fetches of unknown length
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Progress bar for per-entity fan-out (one call per mailbox, device, ...)
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

fn finish_with(bar: &ProgressBar, prefix_style: &str, prefix: &'static str, message: &str) {
    bar.set_style(
        ProgressStyle::default_spinner()
            .template(prefix_style)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_prefix(prefix);
    bar.finish_with_message(message.to_string());
}

pub fn finish_success(bar: &ProgressBar, message: &str) {
    finish_with(bar, "{prefix:.green} {msg}", "✓", message);
}

pub fn finish_error(bar: &ProgressBar, message: &str) {
    finish_with(bar, "{prefix:.red} {msg}", "✗", message);
}
