use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::models::Row;
use crate::parser::{open_file, ParseOptions};

/// Rows grouped by their id column. Row order inside a group follows the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    groups: HashMap<String, Vec<Row>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Rows seen, header included.
    pub rows_read: usize,
    pub header: Option<Row>,
    pub indexed: usize,
    pub missing_key: usize,
}

/// Summary of one file ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub delimiter: char,
    /// Column names from the header row, if one was skipped.
    pub header: Vec<String>,
    pub rows_read: usize,
    pub indexed: usize,
    pub missing_key: usize,
    pub empty: usize,
    pub malformed: usize,
    pub groups: usize,
    pub checksum: String,
}

impl Index {
    /// Single pass over `rows`. The first row is dropped when `has_header`.
    /// Rows without an id are discarded. Any error from the stream aborts the
    /// build and nothing is returned.
    pub fn build<I>(rows: I, has_header: bool) -> Result<(Self, BuildStats)>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
        let mut stats = BuildStats::default();

        for row in rows {
            let row = row?;
            stats.rows_read += 1;
            if has_header && stats.rows_read == 1 {
                stats.header = Some(row);
                continue;
            }
            let Some(key) = row.id() else {
                stats.missing_key += 1;
                continue;
            };
            groups.entry(key.to_string()).or_default().push(row);
            stats.indexed += 1;
        }

        Ok((Self { groups }, stats))
    }

    /// Rows for `key`, or an empty slice.
    pub fn get(&self, key: &str) -> &[Row] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total rows across all groups.
    pub fn row_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Ids sorted, for listings.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Parse `path` and build a fresh index from it. Fails without a partial
/// index when the file cannot be read.
pub fn load(path: &Path, options: &ParseOptions) -> Result<(Index, IngestReport)> {
    let mut rows = open_file(path, options)?;
    let (index, stats) = Index::build(rows.by_ref(), options.has_header)?;

    let report = IngestReport {
        source: path.display().to_string(),
        delimiter: rows.delimiter() as char,
        header: stats.header.map(|h| h.fields().to_vec()).unwrap_or_default(),
        rows_read: stats.rows_read,
        indexed: stats.indexed,
        missing_key: stats.missing_key,
        empty: rows.empty(),
        malformed: rows.malformed(),
        groups: index.len(),
        checksum: rows.checksum(),
    };
    tracing::info!(
        source = %report.source,
        rows = report.indexed,
        groups = report.groups,
        skipped = report.missing_key + report.empty + report.malformed,
        "file indexed"
    );
    Ok((index, report))
}
