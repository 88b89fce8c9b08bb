//! Core data types for the import pipeline
//! Pure data structures with no behavior beyond small accessors

use crate::ingestion::dates::canonical;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Raw input handed from fetch to parse
#[derive(Debug)]
pub enum RawData {
    File(PathBuf),
    Csv(String),
}

/// One data line of the source file, keyed by the normalized header row.
///
/// Headers are shared between all rows of a file. A value is `None` when the
/// line had fewer fields than the header row.
#[derive(Debug, Clone)]
pub struct RawRow {
    headers: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl RawRow {
    pub fn new(headers: Arc<[String]>, mut values: Vec<Option<String>>) -> Self {
        values.resize(headers.len(), None);
        Self { headers, values }
    }

    /// Value under `header`. Duplicate headers resolve to the right-most column.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.headers
            .iter()
            .rposition(|h| h == header)
            .and_then(|idx| self.values[idx].as_deref())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }
}

/// Canonical lead, independent of the export that produced it.
///
/// Field names on the wire are the `leads` table columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeadRecord {
    #[serde(rename = "lead_id")]
    #[sqlx(rename = "lead_id")]
    pub lead_id: Option<String>,

    #[serde(rename = "contato_principal")]
    #[sqlx(rename = "contato_principal")]
    pub primary_contact: Option<String>,

    #[serde(rename = "usuario_responsavel")]
    #[sqlx(rename = "usuario_responsavel")]
    pub responsible_user: Option<String>,

    #[serde(rename = "data_criada", serialize_with = "canonical_opt")]
    #[sqlx(rename = "data_criada")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(rename = "fonte_lead")]
    #[sqlx(rename = "fonte_lead")]
    pub lead_source: Option<String>,

    // Free text: "lead qualificado", "meeting realizado", ...
    #[serde(rename = "etapa_funil")]
    #[sqlx(rename = "etapa_funil")]
    pub funnel_stage: Option<String>,

    #[serde(rename = "estado_mora")]
    #[sqlx(rename = "estado_mora")]
    pub residence_state: Option<String>,

    #[serde(rename = "tipo_agendamento")]
    #[sqlx(rename = "tipo_agendamento")]
    pub appointment_type: Option<String>,

    #[serde(rename = "respostas_ia")]
    #[sqlx(rename = "respostas_ia")]
    pub ai_responses: Option<String>,

    #[serde(rename = "email_comercial")]
    #[sqlx(rename = "email_comercial")]
    pub commercial_email: Option<String>,

    #[serde(rename = "telefone_comercial")]
    #[sqlx(rename = "telefone_comercial")]
    pub commercial_phone: Option<String>,

    #[serde(rename = "estado_contato")]
    #[sqlx(rename = "estado_contato")]
    pub contact_state: Option<String>,

    #[serde(rename = "permissao_trabalho")]
    #[sqlx(rename = "permissao_trabalho")]
    pub work_permission: Option<String>,

    #[serde(rename = "data_entrada_agendamento", serialize_with = "canonical_opt")]
    #[sqlx(rename = "data_entrada_agendamento")]
    pub appointment_entry_date: Option<DateTime<Utc>>,

    #[serde(rename = "data_hora_agendamento_bposs", serialize_with = "canonical_opt")]
    #[sqlx(rename = "data_hora_agendamento_bposs")]
    pub appointment_date_time: Option<DateTime<Utc>>,
}

/// Timestamps go out as `2024-04-03T00:00:00.000Z`
fn canonical_opt<S: Serializer>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serializer.serialize_str(&canonical(ts)),
        None => serializer.serialize_none(),
    }
}

impl LeadRecord {
    /// Short label for log lines: the first identifying field that is set
    pub fn label(&self) -> &str {
        self.lead_id
            .as_deref()
            .or(self.primary_contact.as_deref())
            .or(self.commercial_phone.as_deref())
            .or(self.commercial_email.as_deref())
            .unwrap_or("<unidentified>")
    }
}

/// Columns of the `leads` table that filters may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadColumn {
    LeadId,
    PrimaryContact,
    ResponsibleUser,
    CreatedAt,
    LeadSource,
    FunnelStage,
    ResidenceState,
    AppointmentType,
    AiResponses,
    CommercialEmail,
    CommercialPhone,
    ContactState,
    WorkPermission,
    AppointmentEntryDate,
    AppointmentDateTime,
}

impl LeadColumn {
    pub const ALL: [LeadColumn; 15] = [
        LeadColumn::LeadId,
        LeadColumn::PrimaryContact,
        LeadColumn::ResponsibleUser,
        LeadColumn::CreatedAt,
        LeadColumn::LeadSource,
        LeadColumn::FunnelStage,
        LeadColumn::ResidenceState,
        LeadColumn::AppointmentType,
        LeadColumn::AiResponses,
        LeadColumn::CommercialEmail,
        LeadColumn::CommercialPhone,
        LeadColumn::ContactState,
        LeadColumn::WorkPermission,
        LeadColumn::AppointmentEntryDate,
        LeadColumn::AppointmentDateTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadColumn::LeadId => "lead_id",
            LeadColumn::PrimaryContact => "contato_principal",
            LeadColumn::ResponsibleUser => "usuario_responsavel",
            LeadColumn::CreatedAt => "data_criada",
            LeadColumn::LeadSource => "fonte_lead",
            LeadColumn::FunnelStage => "etapa_funil",
            LeadColumn::ResidenceState => "estado_mora",
            LeadColumn::AppointmentType => "tipo_agendamento",
            LeadColumn::AiResponses => "respostas_ia",
            LeadColumn::CommercialEmail => "email_comercial",
            LeadColumn::CommercialPhone => "telefone_comercial",
            LeadColumn::ContactState => "estado_contato",
            LeadColumn::WorkPermission => "permissao_trabalho",
            LeadColumn::AppointmentEntryDate => "data_entrada_agendamento",
            LeadColumn::AppointmentDateTime => "data_hora_agendamento_bposs",
        }
    }

    /// Whether the column is stored as `TIMESTAMPTZ` rather than text
    pub fn is_timestamp(&self) -> bool {
        matches!(
            self,
            LeadColumn::CreatedAt
                | LeadColumn::AppointmentEntryDate
                | LeadColumn::AppointmentDateTime
        )
    }
}

impl std::fmt::Display for LeadColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadColumn::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown column '{s}'"))
    }
}

/// Row filter understood by every remote table backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Eq { column: LeadColumn, value: String },
}

/// `column=value` as typed on the command line
impl std::str::FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected column=value, got '{s}'"))?;
        Ok(Filter::Eq {
            column: column.trim().parse()?,
            value: value.to_string(),
        })
    }
}

/// Which kind of key the pipeline is running with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialTier {
    Anon,
    ServiceRole,
    Unknown,
}

impl std::fmt::Display for CredentialTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialTier::Anon => write!(f, "anon"),
            CredentialTier::ServiceRole => write!(f, "service_role"),
            CredentialTier::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of the write phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: usize,
    pub errors: usize,
    pub batches: usize,
    /// Batches that were retried row by row
    pub failed_batches: usize,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, errors: {}, batches: {}, failed batches: {}",
            self.inserted, self.errors, self.batches, self.failed_batches
        )
    }
}

/// Import run statistics, filled in as batches complete
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub rows_read: usize,
    pub dropped: usize,
    pub total_inserted: usize,
    pub total_errors: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub final_remote_count: Option<u64>,
    /// Set when the write was skipped because the table already held rows
    pub existing_rows: Option<u64>,
}

impl ImportReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            rows_read: 0,
            dropped: 0,
            total_inserted: 0,
            total_errors: 0,
            batches: 0,
            failed_batches: 0,
            final_remote_count: None,
            existing_rows: None,
        }
    }

    /// Share of attempted records that failed, as a percentage.
    pub fn error_rate(&self) -> f64 {
        let attempted = self.total_inserted + self.total_errors;
        if attempted == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.total_errors as f64 / attempted as f64 * 100.0;
        rate
    }

    /// Folds the counts of a write phase into this report
    pub fn absorb(&mut self, written: &WriteStats) {
        self.total_inserted += written.inserted;
        self.total_errors += written.errors;
        self.batches += written.batches;
        self.failed_batches += written.failed_batches;
    }
}

impl std::fmt::Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let remote = self
            .final_remote_count
            .map_or_else(|| "unavailable".to_string(), |c| c.to_string());
        write!(
            f,
            "rows read: {}, dropped: {}, inserted: {}, errors: {}, error rate: {:.2}%, \
             batches: {} ({} fell back to single inserts), remote count: {}",
            self.rows_read,
            self.dropped,
            self.total_inserted,
            self.total_errors,
            self.error_rate(),
            self.batches,
            self.failed_batches,
            remote
        )?;
        if let Some(existing) = self.existing_rows {
            write!(f, ", write skipped: table already held {existing} rows")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_raw_row_pads_missing_values() {
        let row = RawRow::new(headers(&["a", "b", "c"]), vec![Some("1".to_string())]);

        assert_eq!(row.get("a"), Some("1"));
        assert_eq!(row.get("b"), None);
        assert_eq!(row.get("c"), None);
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_raw_row_duplicate_header_takes_last() {
        let row = RawRow::new(
            headers(&["x", "x"]),
            vec![Some("first".to_string()), Some("second".to_string())],
        );

        assert_eq!(row.get("x"), Some("second"));
    }

    #[test]
    fn test_lead_column_round_trip_names() {
        for column in LeadColumn::ALL {
            assert_eq!(column.as_str().parse::<LeadColumn>(), Ok(column));
        }
        assert!("id; DROP TABLE leads".parse::<LeadColumn>().is_err());
    }

    #[test]
    fn test_filter_from_column_value() {
        assert_eq!(
            "etapa_funil=meeting realizado".parse::<Filter>(),
            Ok(Filter::Eq {
                column: LeadColumn::FunnelStage,
                value: "meeting realizado".to_string(),
            })
        );
        // only the first '=' separates
        assert_eq!(
            "lead_id=a=b".parse::<Filter>(),
            Ok(Filter::Eq {
                column: LeadColumn::LeadId,
                value: "a=b".to_string(),
            })
        );
        assert!("lead_id".parse::<Filter>().is_err());
        assert_eq!(
            "nope=1".parse::<Filter>(),
            Err("unknown column 'nope'".to_string())
        );
    }

    #[test]
    fn test_lead_record_serializes_table_columns() {
        let record = LeadRecord {
            lead_id: Some("L-1".to_string()),
            commercial_phone: Some("+1 555 0100".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 15);
        assert_eq!(json["lead_id"], "L-1");
        assert_eq!(json["telefone_comercial"], "+1 555 0100");
        assert!(json["contato_principal"].is_null());
        assert!(json["data_criada"].is_null());
        for column in LeadColumn::ALL {
            assert!(object.contains_key(column.as_str()), "missing {column}");
        }
    }

    #[test]
    fn test_timestamps_serialize_with_millis() {
        let record = LeadRecord {
            created_at: crate::ingestion::dates::normalize_date("03/04/2024"),
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data_criada"], "2024-04-03T00:00:00.000Z");

        let back: LeadRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_error_rate() {
        let mut report = ImportReport::new(Uuid::nil());
        assert_eq!(report.error_rate(), 0.0);

        report.total_inserted = 3;
        report.total_errors = 1;
        assert!((report.error_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_absorb_write_stats() {
        let mut report = ImportReport::new(Uuid::nil());
        let stats = WriteStats {
            inserted: 7,
            errors: 3,
            batches: 2,
            failed_batches: 1,
        };
        report.absorb(&stats);
        report.absorb(&stats);

        assert_eq!(report.total_inserted, 14);
        assert_eq!(report.total_errors, 6);
        assert_eq!(report.batches, 4);
        assert_eq!(report.failed_batches, 2);
        assert!((report.error_rate() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_prefers_lead_id() {
        let record = LeadRecord {
            lead_id: Some("L-9".to_string()),
            primary_contact: Some("Ana".to_string()),
            ..Default::default()
        };
        assert_eq!(record.label(), "L-9");
        assert_eq!(LeadRecord::default().label(), "<unidentified>");
    }
}
