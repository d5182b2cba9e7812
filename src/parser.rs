use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, TxError};
use crate::models::Row;

/// Delimiters tried by auto-detection, in tie-break order.
pub const DELIMITER_CANDIDATES: &[u8] = b",;\t|";

const DETECT_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Forced delimiter. `None` detects it from the first lines.
    pub delimiter: Option<u8>,
    pub skip_empty_lines: bool,
    pub has_header: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            skip_empty_lines: true,
            has_header: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Delimiter detection
// ---------------------------------------------------------------------------

/// Pick the candidate that splits the sample into the most fields with the
/// same field count on every line. Falls back to `,`.
pub fn detect_delimiter(sample: &[u8]) -> u8 {
    // A truncated trailing line would skew the field counts.
    let complete = match sample.iter().rposition(|&b| b == b'\n') {
        Some(end) => &sample[..=end],
        None => sample,
    };

    let mut best = b',';
    let mut best_score = (false, 1usize);
    for &candidate in DELIMITER_CANDIDATES {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(candidate)
            .from_reader(complete);
        let counts: Vec<usize> = rdr
            .byte_records()
            .filter_map(|r| r.ok())
            .filter(|r| r.iter().any(|f| !f.is_empty()))
            .take(DETECT_LINES)
            .map(|r| r.len())
            .collect();
        let Some(&first) = counts.first() else {
            continue;
        };
        if first < 2 {
            continue;
        }
        let score = (counts.iter().all(|&c| c == first), first);
        if score > best_score {
            best = candidate;
            best_score = score;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Row stream
// ---------------------------------------------------------------------------

/// Hashes everything read through it so the file checksum falls out of the
/// single parsing pass.
pub struct Digesting<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> Read for Digesting<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Lazy, one-shot sequence of parsed rows. Restarting means calling
/// [`parse`] again.
///
/// Per-row decoding problems are counted and skipped. An I/O failure is
/// yielded once as [`TxError::FileUnreadable`] and ends the stream.
pub struct Rows<R> {
    records: csv::ByteRecordsIntoIter<Digesting<R>>,
    source: String,
    delimiter: u8,
    skip_empty_lines: bool,
    empty: usize,
    malformed: usize,
    finished: bool,
}

impl<R: Read> Rows<R> {
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Rows dropped because every field was blank.
    pub fn empty(&self) -> usize {
        self.empty
    }

    /// Rows dropped because they could not be decoded.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// SHA-256 of the bytes consumed so far. Complete once the stream is
    /// exhausted.
    pub fn checksum(&self) -> String {
        let digesting = self.records.reader().get_ref();
        hex::encode(digesting.hasher.clone().finalize())
    }
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let record = match self.records.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Ok(record)) => record,
                Some(Err(e)) if e.is_io_error() => {
                    self.finished = true;
                    return Some(Err(TxError::FileUnreadable {
                        path: self.source.clone(),
                        reason: e.to_string(),
                    }));
                }
                Some(Err(e)) => {
                    tracing::debug!(source = %self.source, error = %e, "skipping malformed row");
                    self.malformed += 1;
                    continue;
                }
            };

            let fields: Option<Vec<String>> = record
                .iter()
                .map(|f| std::str::from_utf8(f).ok().map(str::to_owned))
                .collect();
            let Some(fields) = fields else {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                tracing::debug!(source = %self.source, line, "skipping row with invalid UTF-8");
                self.malformed += 1;
                continue;
            };

            let row = Row::new(fields);
            if self.skip_empty_lines && row.is_blank() {
                self.empty += 1;
                continue;
            }
            return Some(Ok(row));
        }
    }
}

/// Start parsing `reader`. Only the delimiter sniffing happens here; rows are
/// produced as the returned iterator is advanced.
pub fn parse<R: BufRead>(mut reader: R, options: &ParseOptions, source: &str) -> Result<Rows<R>> {
    let sample = reader.fill_buf().map_err(|e| TxError::FileUnreadable {
        path: source.to_string(),
        reason: e.to_string(),
    })?;
    if sample.contains(&0) {
        return Err(TxError::FileUnreadable {
            path: source.to_string(),
            reason: "binary content, expected delimited text".to_string(),
        });
    }
    let delimiter = options.delimiter.unwrap_or_else(|| detect_delimiter(sample));
    tracing::debug!(source, delimiter = %(delimiter as char).escape_default(), "parsing");

    let records = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(Digesting {
            inner: reader,
            hasher: Sha256::new(),
        })
        .into_byte_records();

    Ok(Rows {
        records,
        source: source.to_string(),
        delimiter,
        skip_empty_lines: options.skip_empty_lines,
        empty: 0,
        malformed: 0,
        finished: false,
    })
}

pub fn open_file(path: &Path, options: &ParseOptions) -> Result<Rows<BufReader<File>>> {
    let source = path.display().to_string();
    let file = File::open(path).map_err(|e| TxError::FileUnreadable {
        path: source.clone(),
        reason: e.to_string(),
    })?;
    parse(BufReader::new(file), options, &source)
}
