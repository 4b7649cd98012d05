//! Tagged console messages shared by every command

use colored::{ColoredString, Colorize};

fn tagged(tag: ColoredString, message: &str) -> String {
    format!("{} {}", tag, message)
}

pub fn info(message: impl AsRef<str>) {
    println!("{}", tagged("→".cyan(), message.as_ref()));
}

pub fn success(message: impl AsRef<str>) {
    println!("{}", tagged("✓".green(), message.as_ref()));
}

/// Recoverable problem; never changes the exit code
pub fn warn(message: impl AsRef<str>) {
    eprintln!("{}", tagged("⚠".yellow().bold(), message.as_ref()));
}

pub fn heading(title: &str) {
    println!("\n{}", title.bold());
    println!("{}", "─".repeat(60));
}
