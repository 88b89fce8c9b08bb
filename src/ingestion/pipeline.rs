//! Import pipeline - read, map, filter, write, verify
//!
//! Reading and mapping happen entirely in memory before the first remote call,
//! so a broken file never leaves a half-written table behind.

use crate::config::Config;
use crate::ingestion::filter::partition_insertable;
use crate::ingestion::mapping::{map_row, missing_columns, unmapped_headers};
use crate::ingestion::parse::{collect_rows, open_rows};
use crate::ingestion::remote::RemoteTable;
use crate::ingestion::types::{CredentialTier, Filter, ImportReport, LeadRecord, RawData, WriteStats};
use crate::ingestion::write::{write_batches, BatchOptions};
use anyhow::{Context, Result};
use std::future::Future;
use tracing::{info, warn};
use uuid::Uuid;

/// Switches of one import run
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch: BatchOptions,
    pub toggle_rls: bool,
    pub clear_before_import: bool,
    pub allow_existing_rows: bool,
    pub sample_size: usize,
    pub tier: CredentialTier,
}

impl From<&Config> for ImportOptions {
    fn from(config: &Config) -> Self {
        Self {
            batch: BatchOptions::from(config),
            toggle_rls: config.toggle_rls,
            clear_before_import: config.clear_before_import,
            allow_existing_rows: config.allow_existing_rows,
            sample_size: config.sample_size,
            tier: config.backend.tier(),
        }
    }
}

/// Records ready to write, plus what was lost getting there
#[derive(Debug, Clone, Default)]
pub struct PreparedLeads {
    pub records: Vec<LeadRecord>,
    pub rows_read: usize,
    pub dropped: usize,
    pub unreadable_lines: usize,
}

impl PreparedLeads {
    /// Report of a run that stops before the write phase
    pub fn dry_run_report(&self, run_id: Uuid) -> ImportReport {
        let mut report = ImportReport::new(run_id);
        report.rows_read = self.rows_read;
        report.dropped = self.dropped;
        report
    }
}

/// Parse, map and filter the source
pub fn prepare(raw: RawData) -> Result<PreparedLeads> {
    let rows = open_rows(raw).context("Failed to open CSV source")?;
    let (rows, unreadable_lines) = collect_rows(rows);
    info!("Read {} data rows", rows.len());

    if let Some(first) = rows.first() {
        let headers = first.headers();
        for column in missing_columns(headers) {
            warn!("No source header for column '{}', it will be empty", column);
        }
        let unmapped = unmapped_headers(headers);
        if !unmapped.is_empty() {
            info!("Ignoring unmapped headers: {:?}", unmapped);
        }
    } else {
        warn!("CSV contains no data rows");
    }

    let rows_read = rows.len();
    let records: Vec<LeadRecord> = rows.iter().map(map_row).collect();
    let (records, dropped) = partition_insertable(records);

    Ok(PreparedLeads {
        records,
        rows_read,
        dropped,
        unreadable_lines,
    })
}

/// Run `work` with row-level security disabled on `table`.
///
/// Disabling is best effort: a refusal is logged and `work` runs anyway.
/// Re-enabling is attempted exactly once afterwards, whether or not `work`
/// succeeded.
pub async fn with_rls_suspended<T, F, Fut>(
    table: &dyn RemoteTable,
    tier: CredentialTier,
    work: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if tier == CredentialTier::Anon {
        warn!("Toggling row-level security with an anon key, the remote will probably refuse");
    }

    match table.set_row_level_security(false).await {
        Ok(()) => info!("Row-level security disabled"),
        Err(e) => warn!("Could not disable row-level security, writing anyway: {}", e),
    }

    let result = work().await;

    match table.set_row_level_security(true).await {
        Ok(()) => info!("Row-level security re-enabled"),
        Err(e) => warn!(
            "Could not re-enable row-level security on {}: {}. Check the table policy by hand",
            table.describe(),
            e
        ),
    }

    result
}

/// Full import against `table`.
///
/// A table that already holds rows is left untouched unless the run clears it
/// first or explicitly allows importing on top.
pub async fn run_import(
    table: &dyn RemoteTable,
    prepared: PreparedLeads,
    options: &ImportOptions,
    run_id: Uuid,
) -> Result<ImportReport> {
    let mut report = prepared.dry_run_report(run_id);
    let records = prepared.records;

    preview(&records, options.sample_size);

    if !options.clear_before_import && !options.allow_existing_rows {
        match table.count().await {
            Ok(existing) if existing > 0 => {
                warn!(
                    "{} already holds {} rows, skipping the write to avoid duplicates \
                     (clear first or allow existing rows)",
                    table.describe(),
                    existing
                );
                report.existing_rows = Some(existing);
                report.final_remote_count = Some(existing);
                return Ok(report);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check for existing rows, writing anyway: {}", e),
        }
    }

    let records = &records;
    let write_phase = move || async move {
        if options.clear_before_import {
            clear_table(table).await;
        }
        Ok::<_, anyhow::Error>(write_batches(table, records, &options.batch).await)
    };

    let stats: WriteStats = if options.toggle_rls {
        with_rls_suspended(table, options.tier, write_phase).await?
    } else {
        write_phase().await?
    };
    report.absorb(&stats);

    match table.count().await {
        Ok(count) => report.final_remote_count = Some(count),
        Err(e) => warn!("Could not count remote rows: {}", e),
    }

    if report.total_inserted > 0 && options.sample_size > 0 {
        read_back(table, options.sample_size).await;
    }

    info!("Import complete: {}", report);

    Ok(report)
}

fn preview(records: &[LeadRecord], sample_size: usize) {
    for (i, record) in records.iter().take(sample_size).enumerate() {
        match serde_json::to_string(record) {
            Ok(json) => info!("Sample record {}: {}", i + 1, json),
            Err(e) => warn!("Sample record {} could not be serialized: {}", i + 1, e),
        }
    }
}

async fn clear_table(table: &dyn RemoteTable) {
    match table.delete(&Filter::All).await {
        Ok(()) => info!("Cleared existing rows"),
        Err(e) => warn!("Could not clear existing rows, importing on top: {}", e),
    }
}

async fn read_back(table: &dyn RemoteTable, sample_size: usize) {
    match table.select(&Filter::All, Some(sample_size)).await {
        Ok(rows) => {
            for row in &rows {
                info!(
                    "Stored: {} | stage: {} | phone: {}",
                    row.label(),
                    row.funnel_stage.as_deref().unwrap_or("-"),
                    row.commercial_phone.as_deref().unwrap_or("-")
                );
            }
        }
        Err(e) => warn!("Could not read back sample rows: {}", e),
    }
}

/// Remote row count and up to `sample_size` stored rows matching `filter`
pub async fn verify(
    table: &dyn RemoteTable,
    filter: &Filter,
    sample_size: usize,
) -> Result<(u64, Vec<LeadRecord>)> {
    let count = table.count().await.context("Failed to count remote rows")?;
    let sample = table
        .select(filter, Some(sample_size))
        .await
        .context("Failed to read sample rows")?;
    Ok((count, sample))
}

/// Delete every row. Returns how many rows the table held before.
pub async fn purge(table: &dyn RemoteTable) -> Result<u64> {
    let before = table.count().await.context("Failed to count remote rows")?;
    table
        .delete(&Filter::All)
        .await
        .with_context(|| format!("Failed to delete rows from {}", table.describe()))?;
    info!("Deleted {} rows from {}", before, table.describe());
    Ok(before)
}
