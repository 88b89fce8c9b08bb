//! Parse functions - turn the raw export into header-keyed rows

use crate::error::FetchError;
use crate::ingestion::types::{RawData, RawRow};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use std::fs::File;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lazy sequence of [`RawRow`]s read from a CSV source.
///
/// The first line with any non-blank cell becomes the header row. Blank lines
/// are skipped everywhere. Fields are split by a quote-aware tokenizer, so an
/// embedded comma inside a quoted cell stays in its column.
pub struct CsvRows<R: Read> {
    records: StringRecordsIntoIter<R>,
    headers: Option<Arc<[String]>>,
}

impl<R: Read> CsvRows<R> {
    pub fn new(reader: R) -> Self {
        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader)
            .into_records();

        Self {
            records,
            headers: None,
        }
    }

    /// Normalized header row, once it has been read
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<RawRow, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };

            if is_blank(&record) {
                continue;
            }

            let Some(headers) = self.headers.clone() else {
                let headers: Arc<[String]> = record.iter().map(normalize_header).collect();
                info!("Headers found: {:?}", headers);
                self.headers = Some(headers);
                continue;
            };

            if record.len() > headers.len() {
                debug!(
                    "Line {} has {} fields for {} headers, dropping extras",
                    record.position().map_or(0, csv::Position::line),
                    record.len(),
                    headers.len()
                );
            }

            let values = record
                .iter()
                .take(headers.len())
                .map(|v| Some(v.to_string()))
                .collect();

            return Some(Ok(RawRow::new(headers, values)));
        }
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// Trim whitespace, a byte-order mark and surrounding quote characters
pub fn normalize_header(cell: &str) -> String {
    cell.trim_start_matches('\u{feff}')
        .trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .to_string()
}

/// Open a row stream over either an on-disk file or in-memory text
pub fn open_rows(raw: RawData) -> Result<CsvRows<Box<dyn Read + Send>>, FetchError> {
    let reader: Box<dyn Read + Send> = match raw {
        RawData::File(path) => {
            let file = File::open(&path).map_err(|source| FetchError::Io { path, source })?;
            Box::new(file)
        }
        RawData::Csv(text) => Box::new(Cursor::new(text.into_bytes())),
    };

    Ok(CsvRows::new(reader))
}

/// Drain a row stream, skipping lines the tokenizer cannot read.
///
/// Returns the rows and the number of unreadable lines.
pub fn collect_rows<R: Read>(rows: CsvRows<R>) -> (Vec<RawRow>, usize) {
    let mut collected = Vec::new();
    let mut parse_errors = 0;

    for result in rows {
        match result {
            Ok(row) => collected.push(row),
            Err(e) => {
                parse_errors += 1;
                if parse_errors <= 10 {
                    // Only log first 10 errors
                    warn!("Skipping unreadable CSV line: {}", e);
                }
            }
        }
    }

    info!(
        "Parsed {} rows from CSV ({} unreadable lines)",
        collected.len(),
        parse_errors
    );

    (collected, parse_errors)
}
