use batchflow_shared::record::{Record, Value};
use batchflow_shared::store::Store;
use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::error::{Error, Result};

/// Commits the records to the target: every record gets the same last updated timestamp, then all of
/// them are upserted with a single call. An empty batch does not touch the target. Returns the number
/// of committed records.
pub async fn commit(target: &dyn Store, mut records: Vec<Record>) -> Result<usize> {
    let num_records = records.len();
    debug!(store = target.name(), num_records, "Updating target");

    if records.is_empty() {
        return Ok(0);
    }

    let key = target.key();
    if let Some(position) = records
        .iter()
        .position(|record| record.get(key).is_none_or(Value::is_null))
    {
        return Err(Error::Target(format!(
            "record {position} of the batch has no value for key field {key}"
        )));
    }

    let committed_at = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
    let last_updated_field = target.last_updated_field();
    for record in records.iter_mut() {
        record.insert(last_updated_field.to_string(), committed_at.clone());
    }

    target
        .update(records)
        .await
        .map_err(|e| Error::Target(format!("failed to update {}: {e}", target.name())))?;
    Ok(num_records)
}
