//! Output formatting for CLI

use clap::ValueEnum;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

/// Render rows as a table, or as JSON when asked for
pub fn print_rows<T: Serialize + Tabled>(rows: &[T], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table | OutputFormat::Text => {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }
    Ok(())
}

/// Epoch milliseconds as an RFC 3339 timestamp
pub fn format_epoch_ms(epoch_ms: Option<f64>) -> String {
    epoch_ms
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

pub fn yes_no(value: bool) -> String {
    if value {
        console::style("yes").green().to_string()
    } else {
        console::style("no").red().to_string()
    }
}
