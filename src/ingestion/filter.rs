//! Validity filter - keep only records that identify someone

use crate::ingestion::types::LeadRecord;
use tracing::{debug, info};

/// A record is insertable when any identifying field is present.
/// Pure function - no side effects
pub fn is_insertable(record: &LeadRecord) -> bool {
    [
        &record.primary_contact,
        &record.commercial_phone,
        &record.commercial_email,
        &record.lead_id,
    ]
    .iter()
    .any(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
}

/// Split records into (insertable, dropped count), keeping file order
pub fn partition_insertable(records: Vec<LeadRecord>) -> (Vec<LeadRecord>, usize) {
    let total = records.len();
    let mut kept = Vec::with_capacity(total);

    for (idx, record) in records.into_iter().enumerate() {
        if is_insertable(&record) {
            kept.push(record);
        } else {
            debug!("Dropping row {}: no contact, phone, email or lead id", idx + 1);
        }
    }

    let dropped = total - kept.len();
    info!("{} insertable records, {} dropped", kept.len(), dropped);

    (kept, dropped)
}
