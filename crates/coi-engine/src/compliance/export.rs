use serde::Serialize;

use super::audit::AuditEntry;
use super::repository::CoiRecord;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write csv row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to finish csv export: {0}")]
    Flush(String),
    #[error("csv output was not valid utf-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Serialize)]
struct CoiRow<'a> {
    id: &'a str,
    owner_kind: &'a str,
    owner_id: &'a str,
    building_id: &'a str,
    insured_name: &'a str,
    status: &'a str,
    effective_date: String,
    expiration_date: String,
    additional_insured: bool,
    waiver_of_subrogation: bool,
}

#[derive(Serialize)]
struct AuditRow<'a> {
    id: u64,
    entity: &'a str,
    entity_id: &'a str,
    action: &'a str,
    actor: &'a str,
    details: String,
    at: String,
}

fn write_rows<T, I>(rows: I) -> Result<String, ExportError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Flush(err.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Certificates as CSV, one row per record with a header line.
pub fn cois_to_csv(records: &[CoiRecord]) -> Result<String, ExportError> {
    write_rows(records.iter().map(|record| CoiRow {
        id: &record.id.0,
        owner_kind: record.owner.kind_label(),
        owner_id: record.owner.id(),
        building_id: &record.building_id.0,
        insured_name: record.snapshot.insured_name.as_deref().unwrap_or(""),
        status: record.status.label(),
        effective_date: record.snapshot.effective_date.to_string(),
        expiration_date: record.snapshot.expiration_date.to_string(),
        additional_insured: record.snapshot.endorsements.additional_insured,
        waiver_of_subrogation: record.snapshot.endorsements.waiver_of_subrogation,
    }))
}

pub fn audit_to_csv(entries: &[AuditEntry]) -> Result<String, ExportError> {
    write_rows(entries.iter().map(|entry| AuditRow {
        id: entry.id,
        entity: &entry.event.entity,
        entity_id: &entry.event.entity_id,
        action: entry.event.action.label(),
        actor: entry.event.actor.label(),
        details: entry.event.details.to_string(),
        at: entry.event.at.to_rfc3339(),
    }))
}
