//! Audit event log backends
//!
//! The event log is the single source of truth for ingestion status. All
//! status changes flow through `EventLog::update_status`, which enforces
//! the transition table; no other component writes status.

pub mod memory;
pub mod pg;

pub use memory::MemoryEventLog;
pub use pg::PgEventLog;

use serde_json::Value as JsonValue;

/// Shallow-merge `updates` into `base`. Non-object bases are replaced.
pub(crate) fn merge_metadata(base: &mut JsonValue, updates: JsonValue) {
    match (base.as_object_mut(), updates) {
        (Some(target), JsonValue::Object(source)) => {
            for (k, v) in source {
                target.insert(k, v);
            }
        },
        (_, updates) => *base = updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_metadata_overlays_keys() {
        let mut base = json!({"sender": "a@amazon.com", "total_rows": 1});
        merge_metadata(&mut base, json!({"total_rows": 10, "dropped_rows": 0}));
        assert_eq!(base, json!({"sender": "a@amazon.com", "total_rows": 10, "dropped_rows": 0}));
    }

    #[test]
    fn test_merge_metadata_replaces_non_object() {
        let mut base = json!(null);
        merge_metadata(&mut base, json!({"k": 1}));
        assert_eq!(base, json!({"k": 1}));
    }
}
