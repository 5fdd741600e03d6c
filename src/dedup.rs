//! Index of previously collected post ids.
//!
//! Built once at the start of a collection pass from whatever tables exist on
//! disk, then only read. A table that cannot be loaded is skipped with a
//! warning: the index is then smaller, so the collector may re-fetch posts it
//! already has rather than miss new ones.

use crate::error::TableError;
use crate::table::{POST_ID, Table};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    ids: HashSet<String>,
}

impl DedupIndex {
    /// Union the `post_id` columns of every readable table.
    #[instrument(level = "info", skip_all, fields(tables = paths.len()))]
    pub fn build<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut index = Self::default();
        for path in paths {
            let path = path.as_ref();
            match index.extend_from(path) {
                Ok(count) => info!(path = %path.display(), count, "Loaded post ids"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable table"),
            }
        }
        info!(unique = index.len(), "Dedup index built");
        index
    }

    fn extend_from(&mut self, path: &Path) -> Result<usize, TableError> {
        let table = Table::load(path)?;
        let column = table.column(POST_ID).ok_or_else(|| TableError::MissingColumn {
            column: POST_ID.to_string(),
            path: path.to_path_buf(),
        })?;
        let mut count = 0;
        for id in column.filter(|id| !id.is_empty()) {
            self.ids.insert(id.to_string());
            count += 1;
        }
        Ok(count)
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Write the ids as a sorted single-column `post_id` table.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let mut table = Table::new([POST_ID]);
        for id in ids {
            table.push_named([(POST_ID, id)]);
        }
        table.store(path)
    }
}

impl FromIterator<String> for DedupIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
