//! Output formatting for CLI

use anyhow::Result;
use clap::ValueEnum;
use comfy_table::Table;
use serde::{Deserialize, Serialize};

mod plain;
mod table;

pub use plain::PlainFormatter;
pub use table::TableFormatter;

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Table output (default)
    #[default]
    Table,
    /// Indented `key: value` lines
    Plain,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

/// Render `value` in `format`; `table` builds the table view.
pub fn render<T, F>(format: OutputFormat, value: &T, table: F) -> Result<String>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> Table,
{
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Table => Ok(table(value).to_string()),
        OutputFormat::Plain => PlainFormatter::format(value),
    }
}

/// Render and print to stdout
pub fn print<T, F>(format: OutputFormat, value: &T, table: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> Table,
{
    println!("{}", render(format, value, table)?);
    Ok(())
}

/// Color helpers
pub mod colors {
    use colored::*;

    pub fn success(s: &str) -> ColoredString {
        s.green()
    }

    pub fn error(s: &str) -> ColoredString {
        s.red()
    }

    pub fn warning(s: &str) -> ColoredString {
        s.yellow()
    }

    pub fn dim(s: &str) -> ColoredString {
        s.dimmed()
    }

    pub fn bold(s: &str) -> ColoredString {
        s.bold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_domain::DailyCount;

    fn sample() -> Vec<DailyCount> {
        vec![DailyCount {
            date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            count: 12,
        }]
    }

    #[test]
    fn test_render_json() {
        let out = render(OutputFormat::Json, &sample(), |d| TableFormatter::daily_counts(d)).unwrap();
        assert!(out.contains("\"2024-03-01\""));
        assert!(out.contains("\"count\": 12"));
    }

    #[test]
    fn test_render_table_uses_builder() {
        let out = render(OutputFormat::Table, &sample(), |d| TableFormatter::daily_counts(d)).unwrap();
        assert!(out.contains("2024-03-01"));
        assert!(out.contains("12"));
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Plain.to_string(), "plain");
    }

    #[test]
    fn test_output_format_serialization() {
        let serialized = serde_json::to_string(&OutputFormat::Json).unwrap();
        assert_eq!(serialized, "\"json\"");

        let deserialized: OutputFormat = serde_json::from_str("\"table\"").unwrap();
        assert_eq!(deserialized, OutputFormat::Table);
    }
}
