//! Combines partial records that describe the same entity into one record per key.
//!
//! Records are grouped by the value of the key field. Within a group records are merged in arrival
//! order with shallow, last-writer-wins semantics per field. The key field is written last so a
//! stale or renamed copy of the key carried by one of the records can not replace the group's key.

use std::collections::HashMap;

use batchflow_shared::record::{KeyValue, Record};
use tracing::debug;

use crate::error::{Error, Result};

/// Partitions the records by the value of the key field. Groups are ordered by the first arrival of
/// their key and keep the arrival order of their records.
pub fn group_by_key(records: Vec<Record>, key: &str) -> Result<Vec<(KeyValue, Vec<Record>)>> {
    let mut positions: HashMap<KeyValue, usize> = HashMap::new();
    let mut groups: Vec<(KeyValue, Vec<Record>)> = Vec::new();

    for record in records {
        let key_value = record
            .get(key)
            .cloned()
            .and_then(KeyValue::new)
            .ok_or_else(|| {
                Error::Transform(format!("record has no usable value for key field {key}"))
            })?;

        match positions.get(&key_value) {
            Some(&idx) => {
                if let Some((_, group)) = groups.get_mut(idx) {
                    group.push(record);
                }
            }
            None => {
                positions.insert(key_value.clone(), groups.len());
                groups.push((key_value, vec![record]));
            }
        }
    }

    Ok(groups)
}

/// Shallow merge of the records in order, then the key field is set to the group's key.
pub fn merge_group(key: &str, key_value: KeyValue, records: Vec<Record>) -> Record {
    let mut merged = Record::new();
    for record in records {
        merged.extend(record);
    }
    merged.insert(key.to_string(), key_value.into_value());
    merged
}

/// Returns exactly one merged record per distinct key value found in the records.
pub fn merge_by_key(records: Vec<Record>, key: &str) -> Result<Vec<Record>> {
    let groups = group_by_key(records, key)?;
    let merged = groups
        .into_iter()
        .map(|(key_value, group)| {
            debug!(key, %key_value, records = group.len(), "Aggregating records");
            merge_group(key, key_value, group)
        })
        .collect();
    Ok(merged)
}
