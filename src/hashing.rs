//! Keyed pseudonymization of identifier columns.
//!
//! Each non-empty cell of a selected column is replaced by the first 16 hex
//! characters of HMAC-SHA256(secret, value). The same value under the same
//! secret always hashes the same way, so hashed tables still join on
//! `post_id`. Empty cells are missing values and pass through unchanged.

use crate::error::TableError;
use crate::table::Table;
use crate::utils::ensure_writable_dir;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from each digest.
pub const HASH_LEN: usize = 16;

/// Name of the output directory created inside an input directory.
const HASHED_DIR: &str = "hashed";

pub fn keyed_hash(value: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(value.as_bytes());
    let mut digest = hex::encode(mac.finalize().into_bytes());
    digest.truncate(HASH_LEN);
    digest
}

/// Hash `columns` of `table` in place and return the ones that were present.
pub fn hash_columns(table: &mut Table, columns: &[String], secret: &str) -> Vec<String> {
    let mut hashed = Vec::new();
    for column in columns {
        if table.map_column(column, |value| keyed_hash(value, secret)) {
            hashed.push(column.clone());
        } else {
            warn!(%column, "Column not found; leaving table unchanged for it");
        }
    }
    hashed
}

/// Load one table, hash its id columns and store it at `output`.
#[instrument(level = "info", skip_all, fields(input = %input.display()))]
pub fn hash_file(
    input: &Path,
    output: &Path,
    columns: &[String],
    secret: &str,
) -> Result<(), TableError> {
    let mut table = Table::load(input)?;
    let hashed = hash_columns(&mut table, columns, secret);
    info!(columns = ?hashed, "Hashing columns");
    table.store(output)?;
    info!(output = %output.display(), rows = table.len(), "Saved hashed table");
    Ok(())
}

/// `<stem>_hashed<ext>` beside the input file.
pub fn default_file_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_hashed.{}", ext.to_string_lossy()),
        None => format!("{stem}_hashed"),
    };
    input.with_file_name(name)
}

/// Result of hashing a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    /// The input path does not exist.
    InputMissing,
    /// Paths of the hashed tables written.
    Written(Vec<PathBuf>),
}

/// Hash a single CSV file, or every `*.csv` directly inside a directory.
///
/// Directory mode writes `<stem>_hashed.csv` into `output` (default
/// `<input>/hashed/`), creating it if needed. A table that fails to load or
/// store aborts the run.
#[instrument(level = "info", skip_all, fields(input = %input.display()))]
pub async fn hash_path(
    input: &Path,
    output: Option<&Path>,
    columns: &[String],
    secret: &str,
) -> Result<HashOutcome, Box<dyn Error>> {
    if input.is_file() {
        let output = output.map_or_else(|| default_file_output(input), Path::to_path_buf);
        hash_file(input, &output, columns, secret)?;
        return Ok(HashOutcome::Written(vec![output]));
    }
    if !input.is_dir() {
        warn!("Input path not found");
        return Ok(HashOutcome::InputMissing);
    }

    let out_dir = output.map_or_else(|| input.join(HASHED_DIR), Path::to_path_buf);
    ensure_writable_dir(&out_dir).await?;

    let mut inputs = Vec::new();
    let mut entries = fs::read_dir(input).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            inputs.push(path);
        }
    }
    inputs.sort();

    let mut written = Vec::with_capacity(inputs.len());
    for path in inputs {
        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let target = out_dir.join(format!("{stem}_hashed.csv"));
        hash_file(&path, &target, columns, secret)?;
        written.push(target);
    }
    info!(files = written.len(), "Hashed directory");
    Ok(HashOutcome::Written(written))
}
