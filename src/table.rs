//! Generic CSV tables with named columns.
//!
//! Every stage exchanges data through CSV files that share a `post_id`
//! column. [`Table`] keeps all cells as strings; an empty cell is a missing
//! value. Typed rows (posts, comments) are written through
//! [`store_records`] so that an empty result still produces a header line.

use crate::error::TableError;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, instrument};

/// Name of the join/dedup key shared by every table.
pub const POST_ID: &str = "post_id";

/// An in-memory CSV table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Load a table from disk. Short rows are padded with empty cells.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TableError::NotFound(path.to_path_buf()),
            _ => TableError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let headers: Vec<String> = rdr.headers().map_err(csv_err)?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(csv_err)?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        debug!(rows = rows.len(), columns = headers.len(), "Loaded table");
        Ok(Self { headers, rows })
    }

    /// Write the table to disk, replacing any existing file.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(&self.headers).map_err(csv_err)?;
        for row in &self.rows {
            wtr.write_record(row).map_err(csv_err)?;
        }
        wtr.flush().map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(rows = self.rows.len(), "Stored table");
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Iterate the cells of one column, or `None` when the column is absent.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + use<'a>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[idx].as_str()))
    }

    /// Append a row given as `(column, value)` pairs; unknown columns are
    /// ignored and unnamed ones left empty.
    pub fn push_named<'a>(&mut self, cells: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut row = vec![String::new(); self.headers.len()];
        for (column, value) in cells {
            if let Some(idx) = self.column_index(column) {
                row[idx] = value.to_string();
            }
        }
        self.rows.push(row);
    }

    /// Keep only the rows for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Table, &[String]) -> bool) {
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .filter(|row| keep(self, row.as_slice()))
            .collect();
    }

    /// Rewrite every non-empty cell of `column` in place.
    pub fn map_column(&mut self, column: &str, mut f: impl FnMut(&str) -> String) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        for row in &mut self.rows {
            if !row[idx].is_empty() {
                row[idx] = f(&row[idx]);
            }
        }
        true
    }

    /// Cell value for `column` in `row`, empty when the column is absent.
    pub fn cell<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.column_index(column)
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Stable ascending sort on one column's string value.
    pub fn sort_by_column(&mut self, column: &str) {
        if let Some(idx) = self.column_index(column) {
            self.rows.sort_by(|a, b| a[idx].cmp(&b[idx]));
        }
    }

    /// Keep the first row for each distinct value of `column`.
    pub fn dedup_by_column(&mut self, column: &str) {
        let Some(idx) = self.column_index(column) else {
            return;
        };
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row[idx].clone()));
    }

    /// Concatenate tables, unioning their columns in first-seen order.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let mut out = Table::default();
        for table in tables {
            for header in &table.headers {
                if out.column_index(header).is_none() {
                    out.headers.push(header.clone());
                    for row in &mut out.rows {
                        row.push(String::new());
                    }
                }
            }
            let positions: Vec<usize> = table
                .headers
                .iter()
                .filter_map(|h| out.column_index(h))
                .collect();
            for row in table.rows {
                let mut aligned = vec![String::new(); out.headers.len()];
                for (cell, &pos) in row.into_iter().zip(&positions) {
                    aligned[pos] = cell;
                }
                out.rows.push(aligned);
            }
        }
        out
    }
}

/// Write typed records under an explicit header line.
pub fn store_records<T: Serialize>(
    path: impl AsRef<Path>,
    columns: &[&str],
    records: &[T],
) -> Result<(), TableError> {
    let path = path.as_ref();
    let csv_err = |source| TableError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;
    wtr.write_record(columns).map_err(csv_err)?;
    for record in records {
        wtr.serialize(record).map_err(csv_err)?;
    }
    wtr.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), rows = records.len(), "Stored records");
    Ok(())
}

/// Append typed records to an existing table, or create it with a header.
pub fn append_records<T: Serialize>(
    path: impl AsRef<Path>,
    columns: &[&str],
    records: &[T],
) -> Result<(), TableError> {
    let path = path.as_ref();
    let has_content = std::fs::metadata(path).is_ok_and(|m| m.len() > 0);
    if !has_content {
        return store_records(path, columns, records);
    }

    let file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    for record in records {
        wtr.serialize(record).map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    }
    wtr.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), rows = records.len(), "Appended records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        let mut t = Table::new(headers.iter().copied());
        for row in rows {
            t.push_named(headers.iter().copied().zip(row.iter().copied()));
        }
        t
    }

    #[test]
    fn test_store_then_load_keeps_quoted_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        let t = table(&["post_id", "body"], &[&["a1", "line one\nline, two"], &["b2", ""]]);
        t.store(&path).unwrap();

        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded, t);
        assert_eq!(loaded.cell(&loaded.rows()[0], "body"), "line one\nline, two");
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let err = Table::load("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, TableError::NotFound(_)));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = table(&["post_id", "title"], &[&["1", "first"]]);
        let b = table(&["title", "post_id", "extra"], &[&["second", "2", "x"]]);
        let merged = Table::concat([a, b]);

        assert_eq!(merged.headers(), ["post_id", "title", "extra"]);
        assert_eq!(merged.rows()[0], ["1", "first", ""]);
        assert_eq!(merged.rows()[1], ["2", "second", "x"]);
    }

    #[test]
    fn test_dedup_keeps_first_row() {
        let mut t = table(
            &["post_id", "title"],
            &[&["1", "first"], &["2", "other"], &["1", "dupe"]],
        );
        t.dedup_by_column(POST_ID);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[0], ["1", "first"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut t = table(
            &["post_id", "date"],
            &[&["b", "2025-01-02"], &["a", "2025-01-01"], &["c", "2025-01-02"]],
        );
        t.sort_by_column("date");
        let ids: Vec<_> = t.column(POST_ID).unwrap().collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_store_records_writes_header_when_empty() {
        #[derive(Serialize)]
        struct Row {
            post_id: String,
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        store_records::<Row>(&path, &["post_id"], &[]).unwrap();

        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded.headers(), ["post_id"]);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_append_records_creates_then_appends() {
        #[derive(Serialize)]
        struct Row<'a> {
            post_id: &'a str,
            score: i64,
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("comments.csv");
        append_records(&path, &["post_id", "score"], &[Row { post_id: "p1", score: 1 }]).unwrap();
        append_records(&path, &["post_id", "score"], &[Row { post_id: "p2", score: 2 }]).unwrap();

        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded.headers(), ["post_id", "score"]);
        let ids: Vec<_> = loaded.column(POST_ID).unwrap().collect();
        assert_eq!(ids, ["p1", "p2"]);
    }
}
