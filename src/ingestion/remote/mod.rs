//! Remote table backends - where normalized leads are written
//!
//! The pipeline only talks to [`RemoteTable`]. Two backends exist: the
//! PostgREST API of a hosted project ([`RestTable`]) and a direct Postgres
//! connection ([`PgTable`]).

pub mod postgres;
pub mod rest;

use crate::config::{Backend, Config};
use crate::error::RemoteError;
use crate::ingestion::types::{Filter, LeadRecord};
use async_trait::async_trait;
use tracing::info;

pub use postgres::PgTable;
pub use rest::RestTable;

/// Row store holding the `leads` table
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Human-readable target, for log lines
    fn describe(&self) -> String;

    /// Insert all rows in one call. Either every row is stored or none is.
    async fn insert(&self, rows: &[LeadRecord]) -> Result<(), RemoteError>;

    async fn count(&self) -> Result<u64, RemoteError>;

    async fn select(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<LeadRecord>, RemoteError>;

    async fn delete(&self, filter: &Filter) -> Result<(), RemoteError>;

    /// Privileged: usually refused under a low-privilege key
    async fn set_row_level_security(&self, enabled: bool) -> Result<(), RemoteError>;
}

/// `ALTER TABLE` statement switching row-level security on or off
pub fn rls_statement(table: &str, enabled: bool) -> String {
    let action = if enabled { "ENABLE" } else { "DISABLE" };
    format!("ALTER TABLE {} {action} ROW LEVEL SECURITY;", qualified(table))
}

/// Schema-qualify a bare table name with `public`
pub(crate) fn qualified(table: &str) -> String {
    if table.contains('.') {
        table.to_string()
    } else {
        format!("public.{table}")
    }
}

/// Build the backend selected by the configuration
pub async fn connect(config: &Config) -> Result<Box<dyn RemoteTable>, RemoteError> {
    let table: Box<dyn RemoteTable> = match &config.backend {
        Backend::Rest {
            base_url, api_key, ..
        } => Box::new(RestTable::new(
            base_url,
            api_key,
            &config.table,
            config.request_timeout,
        )?),
        Backend::Postgres { database_url } => Box::new(
            PgTable::connect(database_url, &config.table, config.request_timeout).await?,
        ),
    };

    info!("Remote table: {}", table.describe());

    Ok(table)
}
