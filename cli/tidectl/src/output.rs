//! Output formatting for the CLI.

use colored::Colorize;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

/// Print a list of rows as a table or JSON array.
pub fn print_output<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(rows) {
                println!("{json}");
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table.with(Style::blank());
            println!("{table}");
        }
    }
}

/// Print a single value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string_pretty(value) {
        println!("{json}");
    }
}

/// Print a success line.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Render a phase string with color.
pub fn colored_phase(phase: &str) -> String {
    match phase {
        "healthy" => phase.green().to_string(),
        "progressing" => phase.cyan().to_string(),
        "paused" => phase.yellow().to_string(),
        "degraded" => phase.red().bold().to_string(),
        other => other.to_string(),
    }
}
