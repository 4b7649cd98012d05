//! Report generation: sorting, console preview and delimited export
//!
//! Every report row is a flat struct with a fixed column list. The reporter
//! sorts rows by a key tuple, optionally previews the first rows, and writes
//! the whole collection to a delimited file. An empty collection writes
//! nothing and prints a notice instead.

pub mod cache;
pub mod filter;
pub mod pivot;
pub mod retention;
pub mod version;

use crate::error::{ReportError, Result};
use chrono::{DateTime, FixedOffset, Local};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A flat report row with a fixed, ordered column set
///
/// `COLUMNS` must list the serialized field names in declaration order.
pub trait ReportRow: Serialize {
    /// File name stem, e.g. `SignIns`
    const NAME: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Columns compared as RFC 3339 timestamps rather than text
    const TIME_COLUMNS: &'static [&'static str] = &[];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            order: SortOrder::Descending,
        }
    }

    /// Reject keys naming a column the row type does not have
    pub fn validate<R: ReportRow>(keys: &[SortKey]) -> Result<()> {
        for key in keys {
            if !R::COLUMNS.contains(&key.column.as_str()) {
                return Err(ReportError::InvalidArgument(format!(
                    "unknown sort column '{}' (available: {})",
                    key.column,
                    R::COLUMNS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for SortKey {
    type Err = ReportError;

    /// `Column`, `Column:asc` or `Column:desc`
    fn from_str(s: &str) -> Result<Self> {
        let (column, order) = match s.rsplit_once(':') {
            Some((column, "asc")) => (column, SortOrder::Ascending),
            Some((column, "desc")) => (column, SortOrder::Descending),
            Some((_, other)) => {
                return Err(ReportError::InvalidArgument(format!(
                    "sort order must be 'asc' or 'desc', got '{}'",
                    other
                )));
            }
            None => (s, SortOrder::Ascending),
        };

        if column.trim().is_empty() {
            return Err(ReportError::InvalidArgument("empty sort column".into()));
        }

        Ok(Self {
            column: column.trim().to_string(),
            order,
        })
    }
}

/// A typed cell value used only for ordering
#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Null,
    Bool(bool),
    Number(f64),
    Time(DateTime<FixedOffset>),
    Text(String),
}

impl SortValue {
    fn from_cell(cell: Option<&Value>, as_time: bool) -> Self {
        match cell {
            None | Some(Value::Null) => SortValue::Null,
            Some(Value::Bool(b)) => SortValue::Bool(*b),
            Some(Value::Number(n)) => n.as_f64().map(SortValue::Number).unwrap_or(SortValue::Null),
            Some(Value::String(s)) if as_time => DateTime::parse_from_rfc3339(s)
                .map(SortValue::Time)
                .unwrap_or(SortValue::Null),
            Some(Value::String(s)) => SortValue::Text(s.clone()),
            Some(other) => SortValue::Text(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Number(_) => 2,
            SortValue::Time(_) => 3,
            SortValue::Text(_) => 4,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Bool(a), SortValue::Bool(b)) => a.cmp(b),
            (SortValue::Number(a), SortValue::Number(b)) => a.total_cmp(b),
            (SortValue::Time(a), SortValue::Time(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Render a serialized cell the way it appears in the CSV
fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Stable sort of `rows` by `keys`; ties keep their fetch order
pub fn sort_rows<R: ReportRow>(rows: &mut Vec<R>, keys: &[SortKey]) -> Result<()> {
    if keys.is_empty() || rows.len() < 2 {
        return Ok(());
    }

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let value = serde_json::to_value(&row)?;
        let sort_values: Vec<SortValue> = keys
            .iter()
            .map(|k| {
                let as_time = R::TIME_COLUMNS.contains(&k.column.as_str());
                SortValue::from_cell(value.get(&k.column), as_time)
            })
            .collect();
        keyed.push((sort_values, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        keys.iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(key, (x, y))| match key.order {
                SortOrder::Ascending => x.compare(y),
                SortOrder::Descending => y.compare(x),
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    rows.extend(keyed.into_iter().map(|(_, row)| row));
    Ok(())
}

/// Result of a report run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No rows; nothing was written
    Empty,
    Written { path: PathBuf, rows: usize },
}

/// Validate a user-supplied delimiter
pub fn parse_delimiter(c: char) -> Result<u8> {
    if !c.is_ascii() || c == '"' || c == '\n' || c == '\r' {
        return Err(ReportError::InvalidArgument(format!(
            "delimiter must be a single ASCII character other than a quote or newline, got {:?}",
            c
        )));
    }
    Ok(c as u8)
}

/// `<dir>/<Name>_<yyyyMMdd_HHmmss>.csv`
pub fn default_output_path(dir: &Path, name: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.csv", name, now.format("%Y%m%d_%H%M%S")))
}

/// Sorts, previews and exports one report
#[derive(Debug, Clone)]
pub struct Reporter {
    output: PathBuf,
    delimiter: u8,
    preview: usize,
}

impl Reporter {
    pub fn new(output: impl Into<PathBuf>, delimiter: u8, preview: usize) -> Self {
        Self {
            output: output.into(),
            delimiter,
            preview,
        }
    }

    /// Sort `rows`, preview the first rows, write them all
    ///
    /// With no rows, prints a notice and returns `Outcome::Empty` without
    /// touching the output path.
    pub fn report<R: ReportRow>(&self, rows: &mut Vec<R>, sort_keys: &[SortKey]) -> Result<Outcome> {
        if rows.is_empty() {
            println!("\n{} No matching records found; no file written", "ℹ".yellow());
            return Ok(Outcome::Empty);
        }

        SortKey::validate::<R>(sort_keys)?;
        sort_rows(rows, sort_keys)?;

        if self.preview > 0 {
            print_preview(rows, self.preview)?;
        }

        write_csv(&self.output, self.delimiter, rows)?;

        println!(
            "\n{} Exported {} row(s) to {}",
            "✓".green(),
            rows.len(),
            self.output.display().to_string().bold()
        );

        Ok(Outcome::Written {
            path: self.output.clone(),
            rows: rows.len(),
        })
    }
}

/// Write the header from `R::COLUMNS` followed by every row
pub fn write_csv<R: ReportRow>(path: &Path, delimiter: u8, rows: &[R]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(R::COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), rows = rows.len(), "report written");
    Ok(())
}

fn print_preview<R: ReportRow>(rows: &[R], limit: usize) -> Result<()> {
    let shown = limit.min(rows.len());
    let width = R::COLUMNS.iter().map(|c| c.len()).max().unwrap_or(0);

    println!(
        "\n{} (first {} of {})",
        "Preview".bold(),
        shown,
        rows.len()
    );

    for (idx, row) in rows.iter().take(shown).enumerate() {
        let value = serde_json::to_value(row)?;
        println!("{}", format!("── {} ", idx + 1).dimmed());
        for column in R::COLUMNS {
            println!(
                "  {:<width$}  {}",
                column,
                cell_text(value.get(*column)),
                width = width
            );
        }
    }

    Ok(())
}
