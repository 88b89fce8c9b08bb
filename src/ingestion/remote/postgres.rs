//! Direct Postgres backend

use crate::error::RemoteError;
use crate::ingestion::remote::{qualified, rls_statement, RemoteTable};
use crate::ingestion::types::{Filter, LeadColumn, LeadRecord};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

/// Table definition, written against `public.leads`
const SCHEMA_SQL: &str = include_str!("../../../migrations/001_create_leads.sql");

pub struct PgTable {
    pool: PgPool,
    /// Always schema-qualified
    table: String,
}

impl PgTable {
    pub async fn connect(
        database_url: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await?;

        info!("Database connected");
        Ok(Self::from_pool(pool, table))
    }

    pub fn from_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: qualified(table),
        }
    }

    /// Create the table, its indexes and policies if they do not exist yet
    pub async fn apply_schema(&self) -> Result<(), RemoteError> {
        let sql = schema_sql(&self.table);
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        info!("Schema applied to {}", self.table);
        Ok(())
    }
}

/// Schema script retargeted at `table`
pub fn schema_sql(table: &str) -> String {
    SCHEMA_SQL.replace("public.leads", &qualified(table))
}

fn column_list() -> String {
    LeadColumn::ALL
        .iter()
        .map(LeadColumn::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_query<'a>(table: &str, rows: &'a [LeadRecord]) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {table} ({}) ", column_list()));

    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.lead_id.clone())
            .push_bind(r.primary_contact.clone())
            .push_bind(r.responsible_user.clone())
            .push_bind(r.created_at)
            .push_bind(r.lead_source.clone())
            .push_bind(r.funnel_stage.clone())
            .push_bind(r.residence_state.clone())
            .push_bind(r.appointment_type.clone())
            .push_bind(r.ai_responses.clone())
            .push_bind(r.commercial_email.clone())
            .push_bind(r.commercial_phone.clone())
            .push_bind(r.contact_state.clone())
            .push_bind(r.work_permission.clone())
            .push_bind(r.appointment_entry_date)
            .push_bind(r.appointment_date_time);
    });

    qb
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if let Filter::Eq { column, value } = filter {
        qb.push(format!(" WHERE {} = ", column.as_str()));
        qb.push_bind(value.clone());
        if column.is_timestamp() {
            qb.push("::timestamptz");
        }
    }
}

fn select_query(table: &str, filter: &Filter, limit: Option<usize>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {table}", column_list()));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY created_at");
    if let Some(limit) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    qb
}

fn delete_query(table: &str, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {table}"));
    push_filter(&mut qb, filter);
    qb
}

#[async_trait]
impl RemoteTable for PgTable {
    fn describe(&self) -> String {
        format!("Postgres table {}", self.table)
    }

    async fn insert(&self, rows: &[LeadRecord]) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut qb = insert_query(&self.table, rows);
        let result = qb.build().execute(&self.pool).await?;
        debug!("Inserted {} rows via Postgres", result.rows_affected());
        Ok(())
    }

    async fn count(&self) -> Result<u64, RemoteError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn select(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<LeadRecord>, RemoteError> {
        let mut qb = select_query(&self.table, filter, limit);
        let rows = qb
            .build_query_as::<LeadRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete(&self, filter: &Filter) -> Result<(), RemoteError> {
        let mut qb = delete_query(&self.table, filter);
        let result = qb.build().execute(&self.pool).await?;
        info!("Deleted {} rows from {}", result.rows_affected(), self.table);
        Ok(())
    }

    async fn set_row_level_security(&self, enabled: bool) -> Result<(), RemoteError> {
        let sql = rls_statement(&self.table, enabled);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_query_binds_every_column() {
        let rows = vec![LeadRecord::default(), LeadRecord::default()];
        let qb = insert_query("public.leads", &rows);
        let sql = qb.sql();

        assert!(sql.starts_with(
            "INSERT INTO public.leads (lead_id, contato_principal, usuario_responsavel, data_criada,"
        ));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"));
        assert!(sql.contains("$30)"));
        assert!(!sql.contains("$31"));
    }

    #[test]
    fn test_select_query_with_filter_and_limit() {
        let filter = Filter::Eq {
            column: LeadColumn::FunnelStage,
            value: "meeting realizado".to_string(),
        };
        let qb = select_query("public.leads", &filter, Some(3));

        assert!(qb.sql().ends_with(" FROM public.leads WHERE etapa_funil = $1 ORDER BY created_at LIMIT $2"));
    }

    #[test]
    fn test_timestamp_filter_is_cast() {
        let filter = Filter::Eq {
            column: LeadColumn::CreatedAt,
            value: "2024-04-03T00:00:00.000Z".to_string(),
        };
        let qb = delete_query("public.leads", &filter);

        assert_eq!(
            qb.sql(),
            "DELETE FROM public.leads WHERE data_criada = $1::timestamptz"
        );
    }

    #[test]
    fn test_unfiltered_delete() {
        assert_eq!(delete_query("public.leads", &Filter::All).sql(), "DELETE FROM public.leads");
    }

    #[test]
    fn test_schema_sql_is_retargeted() {
        let sql = schema_sql("crm.leads");
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS crm.leads ("));
        assert!(sql.contains("ALTER TABLE crm.leads ENABLE ROW LEVEL SECURITY;"));
        assert!(!sql.contains("public.leads"));
    }
}
