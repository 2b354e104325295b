//! CLI console utilities

use colored::*;
use conduit_core::admin::BatchReport;
use serde::Serialize;

/// Formatted output, either human-readable or JSON
pub struct CliConsole {
    json: bool,
}

impl CliConsole {
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message.green());
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }

    pub fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
        println!("{}", "=".repeat(title.len()).dimmed());
    }

    /// Print `value` as one line of JSON
    pub fn json_line<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    pub fn report(&self, title: &str, report: &BatchReport) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        self.print_header(title);
        if report.items.is_empty() {
            println!("No connections selected.");
            return Ok(());
        }
        for item in &report.items {
            let latency = item
                .latency_ms
                .map(|ms| format!(" ({} ms)", ms))
                .unwrap_or_default();
            if item.success {
                println!("  {} {} {}{}", "✓".green(), item.name.bold(), item.message, latency.dimmed());
            } else {
                println!("  {} {} {}", "✗".red(), item.name.bold(), item.message.red());
            }
        }
        println!();
        println!(
            "{} succeeded, {} failed",
            report.succeeded().to_string().green(),
            report.failed().to_string().red()
        );
        Ok(())
    }
}
