//! Field mapping - source headers to canonical lead fields
//!
//! Exports from different periods spell the same column differently, so each
//! target column owns an ordered list of candidate source headers. The first
//! candidate holding a non-empty value wins. The order is a business rule:
//! `etapa_funil` falls back to `estado_contato`, never the other way round.
//! Spellings of the older Title-Case export ("Contato principal", ...) come
//! last in each chain.

use crate::ingestion::dates::normalize_date;
use crate::ingestion::types::{LeadColumn, LeadRecord, RawRow};
use chrono::{DateTime, Utc};

/// Candidate source headers for `column`, in precedence order
pub fn source_headers(column: LeadColumn) -> &'static [&'static str] {
    match column {
        LeadColumn::LeadId => &["lead_id"],
        LeadColumn::PrimaryContact => &[
            "contato_principal (obrigatório)",
            "contato_principal",
            "Contato principal",
        ],
        LeadColumn::ResponsibleUser => &["usuario_responsavel", "Usuário Responsável"],
        LeadColumn::CreatedAt => &["data_criada", "Data Criada"],
        LeadColumn::LeadSource => &["fonte_lead", "Fonte do Lead"],
        LeadColumn::FunnelStage => &[
            "etapa_funil (obrigatório)",
            "estado_contato",
            "Etapa do Funil de Vendas",
        ],
        LeadColumn::ResidenceState => &[
            "estado onde mora",
            "estado_mora",
            "Estado onde mora (contato)",
        ],
        LeadColumn::AppointmentType => &["tipo_agendamento", "Tipo do agendamento"],
        LeadColumn::AiResponses => &["respostas_ia", "Respostas Gerais da I.A"],
        LeadColumn::CommercialEmail => &["email_comercial", "Email comercial (contato)"],
        LeadColumn::CommercialPhone => &["telefone_comercial", "Telefone comercial (contato)"],
        LeadColumn::ContactState => &["estado_contato"],
        LeadColumn::WorkPermission => &[
            "permissao_trabalho (obrigatório)",
            "permissao_trabalho",
            "Permissão de trabalho",
        ],
        LeadColumn::AppointmentEntryDate => &["data_entrada_agendamento"],
        LeadColumn::AppointmentDateTime => &["data_hora_agendamento_bposs"],
    }
}

/// Map one raw row into a [`LeadRecord`]
pub fn map_row(row: &RawRow) -> LeadRecord {
    let text = |column: LeadColumn| clean(pick(row, source_headers(column)));
    let date = |column: LeadColumn| -> Option<DateTime<Utc>> {
        clean(pick(row, source_headers(column))).and_then(|raw| normalize_date(&raw))
    };

    LeadRecord {
        lead_id: text(LeadColumn::LeadId),
        primary_contact: text(LeadColumn::PrimaryContact),
        responsible_user: text(LeadColumn::ResponsibleUser),
        created_at: date(LeadColumn::CreatedAt),
        lead_source: text(LeadColumn::LeadSource),
        funnel_stage: text(LeadColumn::FunnelStage),
        residence_state: text(LeadColumn::ResidenceState),
        appointment_type: text(LeadColumn::AppointmentType),
        ai_responses: text(LeadColumn::AiResponses),
        commercial_email: text(LeadColumn::CommercialEmail),
        commercial_phone: text(LeadColumn::CommercialPhone),
        contact_state: text(LeadColumn::ContactState),
        work_permission: text(LeadColumn::WorkPermission),
        appointment_entry_date: date(LeadColumn::AppointmentEntryDate),
        appointment_date_time: date(LeadColumn::AppointmentDateTime),
    }
}

/// First candidate with a non-empty value
fn pick<'a>(row: &'a RawRow, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|header| row.get(header).filter(|value| !value.is_empty()))
}

/// `""` and the literal `"undefined"` mean "no value"
fn clean(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.is_empty() && *v != "undefined")
        .map(str::to_string)
}

/// Columns with no candidate header present in `headers`
pub fn missing_columns(headers: &[String]) -> Vec<LeadColumn> {
    LeadColumn::ALL
        .into_iter()
        .filter(|column| {
            !source_headers(*column)
                .iter()
                .any(|candidate| headers.iter().any(|h| h == candidate))
        })
        .collect()
}

/// Headers that no column reads from
pub fn unmapped_headers(headers: &[String]) -> Vec<&str> {
    headers
        .iter()
        .map(String::as_str)
        .filter(|h| {
            !LeadColumn::ALL
                .into_iter()
                .any(|column| source_headers(column).contains(h))
        })
        .collect()
}
