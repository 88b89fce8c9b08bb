//! PostgREST backend for hosted (Supabase) projects.
//!
//! Every request carries the project key twice: as `apikey` and as a bearer
//! token. Whether writes pass row-level security depends on the key's role.

use crate::error::RemoteError;
use crate::ingestion::remote::{rls_statement, RemoteTable};
use crate::ingestion::types::{Filter, LeadRecord};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct RestTable {
    client: Client,
    base_url: String,
    api_key: String,
    schema: Option<String>,
    table: String,
}

/// Error body returned by PostgREST on a non-2xx response
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl RestTable {
    /// Creates a client for `{base_url}/rest/v1/{table}`.
    ///
    /// `table` may be schema-qualified. A schema other than `public` is sent
    /// through the `Accept-Profile`/`Content-Profile` headers.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Http`] if the HTTP client cannot be built, or
    /// [`RemoteError::InvalidConfig`] for a base URL without a scheme.
    pub fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RemoteError::InvalidConfig(format!(
                "base URL '{base_url}' must start with http:// or https://"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("lead-import/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (schema, table) = match table.split_once('.') {
            Some(("public", name)) => (None, name.to_string()),
            Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
            None => (None, table.to_string()),
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            schema,
            table,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key);

        match &self.schema {
            Some(schema) => request
                .header("Accept-Profile", schema)
                .header("Content-Profile", schema),
            None => request,
        }
    }

    fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    /// Turn a non-2xx response into [`RemoteError::Rejected`]
    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: PostgrestError = serde_json::from_str(&body).unwrap_or_default();

        let mut message = parsed
            .message
            .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body.clone() });
        if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
            message = format!("{message} ({details})");
        }
        if let Some(hint) = parsed.hint.filter(|h| !h.is_empty()) {
            message = format!("{message} hint: {hint}");
        }

        Err(RemoteError::Rejected {
            status: status.as_u16(),
            code: parsed.code,
            message,
        })
    }
}

/// Query pairs for a filter. An unfiltered DELETE is refused by PostgREST, so
/// "everything" is expressed as `id=not.is.null` when `for_delete` is set.
fn filter_params(filter: &Filter, for_delete: bool) -> Vec<(String, String)> {
    match filter {
        Filter::All if for_delete => vec![("id".to_string(), "not.is.null".to_string())],
        Filter::All => Vec::new(),
        Filter::Eq { column, value } => vec![(column.as_str().to_string(), format!("eq.{value}"))],
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`
pub(crate) fn parse_content_range(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}

#[async_trait]
impl RemoteTable for RestTable {
    fn describe(&self) -> String {
        format!("REST {} (table {})", self.base_url, self.qualified_table())
    }

    async fn insert(&self, rows: &[LeadRecord]) -> Result<(), RemoteError> {
        let response = self
            .authed(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;

        Self::check(response).await?;
        debug!("Inserted {} rows via REST", rows.len());
        Ok(())
    }

    async fn count(&self) -> Result<u64, RemoteError> {
        let response = self
            .authed(self.client.head(self.table_url()))
            .query(&[("select", "*")])
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let response = Self::check(response).await?;
        let header = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        parse_content_range(header).ok_or_else(|| RemoteError::Rejected {
            status: response.status().as_u16(),
            code: None,
            message: format!("missing or malformed Content-Range header: '{header}'"),
        })
    }

    async fn select(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<LeadRecord>, RemoteError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        if let Some(limit) = limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params.extend(filter_params(filter, false));

        let response = self
            .authed(self.client.get(self.table_url()))
            .query(&params)
            .send()
            .await?;

        let body = Self::check(response).await?.text().await?;
        serde_json::from_str(&body).map_err(|source| RemoteError::Decode {
            context: format!("select from {}", self.qualified_table()),
            source,
        })
    }

    async fn delete(&self, filter: &Filter) -> Result<(), RemoteError> {
        let response = self
            .authed(self.client.delete(self.table_url()))
            .query(&filter_params(filter, true))
            .header("Prefer", "return=minimal")
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn set_row_level_security(&self, enabled: bool) -> Result<(), RemoteError> {
        let sql = rls_statement(&self.qualified_table(), enabled);
        let response = self
            .authed(self.client.post(format!("{}/rest/v1/rpc/exec_sql", self.base_url)))
            .json(&serde_json::json!({ "sql_query": sql }))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}
