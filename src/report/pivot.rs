//! Pivoted reports: one row per entity with one column per category
//!
//! Derived from the same detail rows as the entity × category report, so
//! both files always describe the same dataset.

use super::Outcome;
use crate::error::Result;
use colored::Colorize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// A detail row that can be folded into a pivoted report
pub trait PivotSource {
    /// Columns identifying the entity, in output order
    const KEY_COLUMNS: &'static [&'static str];

    /// Values for `KEY_COLUMNS`
    fn entity_key(&self) -> Vec<String>;

    /// Category column this row fills, or `None` for an entity with no categories
    fn category(&self) -> Option<String>;

    /// Cell text written under the category column
    fn cell(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRow {
    pub keys: Vec<String>,
    pub cells: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    key_columns: Vec<String>,
    categories: Vec<String>,
    rows: Vec<PivotRow>,
}

impl Pivot {
    pub fn from_rows<R: PivotSource>(detail: &[R]) -> Self {
        let mut categories = BTreeSet::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut rows: Vec<PivotRow> = Vec::new();

        for record in detail {
            let keys = record.entity_key();
            let slot = *index.entry(keys.clone()).or_insert_with(|| {
                rows.push(PivotRow {
                    keys,
                    cells: BTreeMap::new(),
                });
                rows.len() - 1
            });

            if let Some(category) = record.category() {
                categories.insert(category.clone());
                rows[slot].cells.insert(category, record.cell());
            }
        }

        rows.sort_by(|a, b| a.keys.cmp(&b.keys));

        Self {
            key_columns: R::KEY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            categories: categories.into_iter().collect(),
            rows,
        }
    }

    pub fn headers(&self) -> Vec<String> {
        self.key_columns
            .iter()
            .chain(self.categories.iter())
            .cloned()
            .collect()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Output records; every record has one cell per header
    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(|row| {
            let mut record = row.keys.clone();
            record.extend(
                self.categories
                    .iter()
                    .map(|c| row.cells.get(c).cloned().unwrap_or_default()),
            );
            record
        })
    }

    /// Write the pivot; an empty pivot writes nothing
    pub fn write(&self, path: &Path, delimiter: u8) -> Result<Outcome> {
        if self.rows.is_empty() {
            return Ok(Outcome::Empty);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;
        writer.write_record(self.headers())?;
        for record in self.records() {
            writer.write_record(&record)?;
        }
        writer.flush()?;

        println!(
            "{} Exported pivot ({} entities × {} categories) to {}",
            "✓".green(),
            self.rows.len(),
            self.categories.len(),
            path.display().to_string().bold()
        );

        Ok(Outcome::Written {
            path: path.to_path_buf(),
            rows: self.rows.len(),
        })
    }
}

/// `<stem>_Pivot.<ext>` next to the detail file
pub fn pivot_path_for(detail: &Path) -> std::path::PathBuf {
    let stem = detail
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let ext = detail
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    detail.with_file_name(format!("{}_Pivot.{}", stem, ext))
}
