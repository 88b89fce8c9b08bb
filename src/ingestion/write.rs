//! Write functions - push records to the remote table in batches
//!
//! A batch is inserted in one call. When that call fails, every record of the
//! batch is retried on its own so one bad row only costs itself.

use crate::config::Config;
use crate::ingestion::remote::RemoteTable;
use crate::ingestion::types::{LeadRecord, WriteStats};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between consecutive batches, not after the last one
    pub inter_batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            inter_batch_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&Config> for BatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            inter_batch_delay: config.inter_batch_delay,
        }
    }
}

/// Write all records, in file order, `batch_size` at a time.
///
/// Never fails: rejected records are logged and counted in the returned stats.
pub async fn write_batches(
    table: &dyn RemoteTable,
    records: &[LeadRecord],
    options: &BatchOptions,
) -> WriteStats {
    let batch_size = options.batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    info!(
        "Writing {} records in {} batches of up to {}",
        records.len(),
        total_batches,
        batch_size
    );

    let mut stats = WriteStats::default();

    for (batch_idx, batch) in records.chunks(batch_size).enumerate() {
        let start = batch_idx * batch_size;
        stats.batches += 1;

        match table.insert(batch).await {
            Ok(()) => {
                stats.inserted += batch.len();
                info!(
                    "Batch {}/{}: inserted {} records",
                    batch_idx + 1,
                    total_batches,
                    batch.len()
                );
            }
            Err(e) => {
                stats.failed_batches += 1;
                warn!(
                    "Batch {}/{} rejected ({}), retrying {} records one by one",
                    batch_idx + 1,
                    total_batches,
                    e,
                    batch.len()
                );

                let (inserted, errors) = write_singly(table, batch, start).await;
                stats.inserted += inserted;
                stats.errors += errors;
            }
        }

        if batch_idx + 1 < total_batches && !options.inter_batch_delay.is_zero() {
            tokio::time::sleep(options.inter_batch_delay).await;
        }
    }

    info!("Write complete: {}", stats);

    stats
}

/// Insert each record of a failed batch alone. Returns (inserted, errors).
async fn write_singly(table: &dyn RemoteTable, batch: &[LeadRecord], start: usize) -> (usize, usize) {
    let mut inserted = 0;
    let mut errors = 0;

    for (j, record) in batch.iter().enumerate() {
        match table.insert(std::slice::from_ref(record)).await {
            Ok(()) => inserted += 1,
            Err(e) => {
                errors += 1;
                warn!(
                    "Record {} ({}) rejected: code {}, {}",
                    start + j + 1,
                    record.label(),
                    e.code().as_deref().unwrap_or("-"),
                    e
                );
                match serde_json::to_string(record) {
                    Ok(json) => debug!("Rejected record {}: {}", start + j + 1, json),
                    Err(e) => debug!("Rejected record {} could not be serialized: {}", start + j + 1, e),
                }
            }
        }
    }

    (inserted, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::remote::mock::MockTable;

    fn records(ids: &[&str]) -> Vec<LeadRecord> {
        ids.iter()
            .map(|id| LeadRecord {
                lead_id: Some((*id).to_string()),
                ..Default::default()
            })
            .collect()
    }

    fn no_delay(batch_size: usize) -> BatchOptions {
        BatchOptions {
            batch_size,
            inter_batch_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_successful_batch_is_one_call() {
        let table = MockTable::new();
        let stats = write_batches(&table, &records(&["1", "2", "3"]), &no_delay(50)).await;

        assert_eq!(table.insert_calls(), vec![3]);
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.failed_batches, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_single_inserts() {
        let table = MockTable::poisoned(&["3"]);
        let stats = write_batches(&table, &records(&["1", "2", "3", "4", "5"]), &no_delay(5)).await;

        // one batch call, then exactly one call per record
        assert_eq!(table.insert_calls(), vec![5, 1, 1, 1, 1, 1]);
        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.inserted + stats.errors, 5);
        assert_eq!(stats.failed_batches, 1);

        let stored: Vec<_> = table
            .stored()
            .into_iter()
            .filter_map(|r| r.lead_id)
            .collect();
        assert_eq!(stored, vec!["1", "2", "4", "5"]);
    }

    #[tokio::test]
    async fn test_only_failing_batch_is_retried() {
        let table = MockTable::poisoned(&["4"]);
        let stats = write_batches(&table, &records(&["1", "2", "3", "4", "5"]), &no_delay(2)).await;

        assert_eq!(table.insert_calls(), vec![2, 2, 1, 1, 1]);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_batch_refused_but_rows_accepted() {
        let table = MockTable {
            reject_multi_row: true,
            ..MockTable::default()
        };
        let stats = write_batches(&table, &records(&["1", "2", "3"]), &no_delay(3)).await;

        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.failed_batches, 1);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let table = MockTable::new();
        let stats = write_batches(&table, &[], &no_delay(50)).await;

        assert!(table.insert_calls().is_empty());
        assert_eq!(stats, WriteStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_last_batch() {
        let table = MockTable::new();
        let options = BatchOptions {
            batch_size: 2,
            inter_batch_delay: Duration::from_secs(10),
        };

        let started = tokio::time::Instant::now();
        write_batches(&table, &records(&["1", "2", "3", "4", "5"]), &options).await;

        // three batches, two pauses
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }
}
