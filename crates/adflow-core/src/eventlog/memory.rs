//! In-memory event log backend
//!
//! Enforces exactly the same transition rules as the Postgres backend;
//! the integration suite runs the full pipeline against it.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use adflow_common::{IngestError, Result};

use crate::contract::EventLog;
use crate::model::{IngestionEvent, IngestionStatus, SourceKind};

#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<HashMap<Uuid, IngestionEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build_event(
        account_id: Option<&str>,
        source: SourceKind,
        status: IngestionStatus,
        metadata: JsonValue,
    ) -> IngestionEvent {
        let fingerprint = metadata
            .get("fingerprint")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let raw_file_path = metadata
            .get("raw_file_path")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        IngestionEvent {
            ingestion_id: Uuid::new_v4(),
            account_id: account_id.map(str::to_string),
            source,
            status,
            received_at: Utc::now(),
            processed_at: None,
            failure_reason: None,
            metadata,
            fingerprint,
            raw_file_path,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, IngestionEvent>>> {
        self.events
            .lock()
            .map_err(|_| IngestError::Unknown("event log lock poisoned".to_string()))
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn create_event(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        metadata: JsonValue,
    ) -> Result<IngestionEvent> {
        let event = Self::build_event(account_id, source, IngestionStatus::Received, metadata);
        self.lock()?.insert(event.ingestion_id, event.clone());
        Ok(event)
    }

    async fn update_status(
        &self,
        ingestion_id: Uuid,
        status: IngestionStatus,
        failure_reason: Option<&str>,
        metadata_updates: Option<JsonValue>,
    ) -> Result<()> {
        let mut events = self.lock()?;
        let Some(event) = events.get_mut(&ingestion_id) else {
            warn!(%ingestion_id, "status update for unknown event");
            return Ok(());
        };

        if !event.status.can_transition(status) {
            return Err(IngestError::StateTransition {
                from: event.status.to_string(),
                to: status.to_string(),
            });
        }

        event.status = status;
        event.processed_at = Some(Utc::now());
        if let Some(reason) = failure_reason {
            event.failure_reason = Some(reason.to_string());
        }
        if let Some(updates) = metadata_updates {
            super::merge_metadata(&mut event.metadata, updates);
        }
        Ok(())
    }

    async fn get_event(&self, ingestion_id: Uuid) -> Result<Option<IngestionEvent>> {
        Ok(self.lock()?.get(&ingestion_id).cloned())
    }

    async fn log_duplicate(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        fingerprint: &str,
        mut metadata: JsonValue,
    ) -> Result<IngestionEvent> {
        super::merge_metadata(&mut metadata, serde_json::json!({ "fingerprint": fingerprint }));
        let event =
            Self::build_event(account_id, source, IngestionStatus::DuplicateIgnored, metadata);
        self.lock()?.insert(event.ingestion_id, event.clone());
        Ok(event)
    }
}
