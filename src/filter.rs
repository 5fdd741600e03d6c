//! Keyword and date filtering, and merging of final post tables.
//!
//! Filtering combines two tables gathered for the same event:
//!
//! 1. The **broad** table (site-wide search) keeps only rows where any text
//!    column mentions any required keyword, case-insensitively.
//! 2. The **narrow** table (community search) is trusted as-is and appended.
//! 3. Rows dated on or before the cutoff are dropped and the rest sorted by
//!    date.
//!
//! Dates are `YYYY-MM-DD HH:MM:SS` strings, so plain string comparison orders
//! them correctly. Filtering never dedupes; [`merge_tables`] does.

use crate::error::TableError;
use crate::table::{POST_ID, Table};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Parameters shared by every filter run.
#[derive(Debug, Clone)]
pub struct FilterSpec<'a> {
    pub required_keywords: &'a [String],
    pub date_column: &'a str,
    pub date_cutoff: &'a str,
    pub text_columns: &'a [String],
}

/// True when any text column contains any keyword (case-insensitive).
pub fn matches_keywords(table: &Table, row: &[String], keywords: &[String], text_columns: &[String]) -> bool {
    text_columns.iter().any(|column| {
        let text = table.cell(row, column).to_lowercase();
        keywords.iter().any(|k| text.contains(&k.to_lowercase()))
    })
}

/// Keep rows mentioning any keyword in any of `text_columns`.
pub fn filter_by_keywords(table: &mut Table, keywords: &[String], text_columns: &[String]) {
    for column in text_columns {
        if table.column_index(column).is_none() {
            warn!(%column, "Text column not found; treating as empty");
        }
    }
    table.retain(|t, row| matches_keywords(t, row, keywords, text_columns));
}

/// Keep rows whose date strictly exceeds `cutoff`.
pub fn filter_by_date(table: &mut Table, date_column: &str, cutoff: &str) {
    if table.column_index(date_column).is_none() {
        warn!(%date_column, "Date column not found; no rows pass");
    }
    table.retain(|t, row| t.cell(row, date_column) > cutoff);
}

/// Filter `broad`, append `narrow`, apply the date cutoff and sort by date.
#[instrument(level = "info", skip_all, fields(broad = broad.len(), narrow = narrow.len()))]
pub fn filter_and_merge(mut broad: Table, narrow: Table, spec: &FilterSpec<'_>) -> Table {
    let broad_rows = broad.len();
    filter_by_keywords(&mut broad, spec.required_keywords, spec.text_columns);
    info!(before = broad_rows, after = broad.len(), "Filtered broad rows by keywords");

    let narrow_rows = narrow.len();
    let mut combined = Table::concat([broad, narrow]);
    info!(narrow = narrow_rows, combined = combined.len(), "Combined rows");

    filter_by_date(&mut combined, spec.date_column, spec.date_cutoff);
    combined.sort_by_column(spec.date_column);
    info!(cutoff = spec.date_cutoff, rows = combined.len(), "Final rows after date filter");
    combined
}

/// Load, filter and store one broad/narrow pair.
#[instrument(level = "info", skip_all, fields(broad = %broad.display(), narrow = %narrow.display()))]
pub fn filter_files(
    broad: &Path,
    narrow: &Path,
    spec: &FilterSpec<'_>,
    output: &Path,
) -> Result<Table, TableError> {
    let broad = Table::load(broad)?;
    let narrow = Table::load(narrow)?;
    let table = filter_and_merge(broad, narrow, spec);
    if table.is_empty() {
        warn!(path = %output.display(), "No rows passed the filters");
    }
    table.store(output)?;
    info!(path = %output.display(), rows = table.len(), "Final data saved");
    Ok(table)
}

/// Concatenate tables and keep the first row for each `post_id`.
///
/// Any table that fails to load aborts the merge.
#[instrument(level = "info", skip_all, fields(inputs = paths.len()))]
pub fn merge_tables<P: AsRef<Path>>(paths: &[P]) -> Result<Table, TableError> {
    let tables = paths
        .iter()
        .map(|p| Table::load(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut merged = Table::concat(tables);
    let before = merged.len();
    merged.dedup_by_column(POST_ID);
    info!(before, after = merged.len(), "Merged tables by post_id");
    Ok(merged)
}
