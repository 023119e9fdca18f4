//! Subcommand implementations.
//!
//! Each command exposes `run`, which returns a serializable report, and
//! `execute`, which prints it in the configured format.

pub mod apply;
pub mod begin;
pub mod commit;
pub mod rollback;
pub mod version;

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::OutputFormat;

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Prints a report as JSON, aligned text under a headline, or a table.
pub(crate) fn print_report<R: Serialize>(
    format: &OutputFormat,
    headline: &str,
    report: &R,
    fields: Vec<(&'static str, String)>,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("Failed to serialize report")?
            );
        }
        OutputFormat::Text => {
            println!("{headline}");
            println!();
            for (field, value) in fields {
                println!("  {:<16} {value}", format!("{field}:"));
            }
        }
        OutputFormat::Table => {
            let rows: Vec<FieldRow> = fields
                .into_iter()
                .map(|(field, value)| FieldRow { field, value })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}
