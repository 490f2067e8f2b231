//! Postgres event log backend
//!
//! Writes to the `ingestion_events` table. Database failures on create and
//! update are logged and swallowed so the audit trail can never take the
//! pipeline down with it; transition violations always propagate and leave
//! the stored row untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use adflow_common::{IngestError, Result};

use crate::config::DatabaseConfig;
use crate::contract::EventLog;
use crate::model::{IngestionEvent, IngestionStatus, SourceKind};

pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        debug!("event log database connected");
        Ok(Self::new(pool))
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

    async fn insert(&self, event: &IngestionEvent) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_events
                (ingestion_id, account_id, source, status, received_at,
                 metadata, fingerprint, raw_file_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.ingestion_id)
        .bind(&event.account_id)
        .bind(event.source.to_string())
        .bind(event.status.to_string())
        .bind(event.received_at)
        .bind(&event.metadata)
        .bind(&event.fingerprint)
        .bind(&event.raw_file_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<IngestionEvent> {
        let source: String = row.try_get("source").map_err(db_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        Ok(IngestionEvent {
            ingestion_id: row.try_get("ingestion_id").map_err(db_err)?,
            account_id: row.try_get("account_id").map_err(db_err)?,
            source: source.parse().map_err(IngestError::Unknown)?,
            status: status.parse().map_err(IngestError::Unknown)?,
            received_at: row.try_get::<DateTime<Utc>, _>("received_at").map_err(db_err)?,
            processed_at: row.try_get("processed_at").map_err(db_err)?,
            failure_reason: row.try_get("failure_reason").map_err(db_err)?,
            metadata: row.try_get("metadata").map_err(db_err)?,
            fingerprint: row.try_get("fingerprint").map_err(db_err)?,
            raw_file_path: row.try_get("raw_file_path").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> IngestError {
    IngestError::Unknown(format!("database error: {}", e))
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn create_event(
        &self,
        account_id: Option<&str>,
        source: SourceKind,
        metadata: JsonValue,
    ) -> Result<IngestionEvent> {
        let event = Self::build_event(account_id, source, IngestionStatus::Received, metadata);
        if let Err(e) = self.insert(&event).await {
            // Return the event anyway; the pipeline keeps running.
            warn!(ingestion_id = %event.ingestion_id, error = %e, "failed to persist event");
        }
        Ok(event)
    }

    async fn update_status(
        &self,
        ingestion_id: Uuid,
        status: IngestionStatus,
        failure_reason: Option<&str>,
        metadata_updates: Option<JsonValue>,
    ) -> Result<()> {
        let current = match self.get_event(ingestion_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(%ingestion_id, "status update for unknown event");
                return Ok(());
            },
            Err(e) => {
                warn!(%ingestion_id, error = %e, "failed to load event for status update");
                return Ok(());
            },
        };

        if !current.status.can_transition(status) {
            return Err(IngestError::StateTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE ingestion_events
            SET status = $2,
                processed_at = $3,
                failure_reason = COALESCE($4, failure_reason),
                metadata = metadata || $5
            WHERE ingestion_id = $1
            "#,
        )
        .bind(ingestion_id)
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(failure_reason)
        .bind(metadata_updates.unwrap_or_else(|| JsonValue::Object(Default::default())))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(%ingestion_id, error = %e, "failed to persist status update");
        }
        Ok(())
    }

    async fn get_event(&self, ingestion_id: Uuid) -> Result<Option<IngestionEvent>> {
        let row = sqlx::query(
            r#"
            SELECT ingestion_id, account_id, source, status, received_at,
                   processed_at, failure_reason, metadata, fingerprint, raw_file_path
            FROM ingestion_events
            WHERE ingestion_id = $1
            "#,
        )
        .bind(ingestion_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::event_from_row).transpose()
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
        if let Err(e) = self.insert(&event).await {
            warn!(ingestion_id = %event.ingestion_id, error = %e, "failed to persist duplicate event");
        }
        Ok(event)
    }
}
