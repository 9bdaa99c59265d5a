use tracing::info;

use crate::model::{Field, Record};

/// True for values that carry no information: blank, "--", "----", or any
/// transcriber marker containing "missing".
pub fn is_missing(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v.is_empty() || v.contains("missing") || v == "--" || v == "----"
}

/// How many of `fields` are populated on `record`.
pub fn populated_count(record: &Record, fields: &[Field]) -> usize {
    fields.iter().filter(|f| !is_missing(record.get(**f))).count()
}

/// Accepts the record if at least `required` of `fields` are populated.
pub fn passes_filter(record: &Record, fields: &[Field], required: usize) -> bool {
    let empty = (fields.len() - populated_count(record, fields)) as i64;
    empty <= fields.len() as i64 - required as i64
}

/// Copies out the records with enough populated linkage fields.
pub fn filter_records(records: &[Record], fields: &[Field], required: usize) -> Vec<Record> {
    let accepted: Vec<Record> = records
        .iter()
        .filter(|r| passes_filter(r, fields, required))
        .cloned()
        .collect();
    info!(
        required,
        accepted = accepted.len(),
        rejected = records.len() - accepted.len(),
        "record pre-filter"
    );
    accepted
}
