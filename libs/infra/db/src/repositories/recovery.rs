// [libs/infra/db/src/repositories/recovery.rs]
/*!
 * Respaldo persistente de corridas de recuperación y sus renglones por
 * tenant. El orquestador de la recuperación (en el binario de
 * aplicación) decide cuándo crear, avanzar y cerrar una corrida; este
 * repositorio sólo proyecta ese estado hacia y desde libSQL.
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_models::{RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct RecoveryRepository {
    client: Arc<DbClient>,
}

fn trigger_to_text(trigger: RecoveryTrigger) -> &'static str {
    match trigger {
        RecoveryTrigger::HeartbeatTimeout => "heartbeat_timeout",
        RecoveryTrigger::Manual => "manual",
    }
}

fn text_to_trigger(raw: &str) -> Result<RecoveryTrigger, DbError> {
    match raw {
        "heartbeat_timeout" => Ok(RecoveryTrigger::HeartbeatTimeout),
        "manual" => Ok(RecoveryTrigger::Manual),
        other => Err(DbError::MappingError(format!("unknown recovery trigger {other}"))),
    }
}

fn event_status_to_text(status: RecoveryStatus) -> &'static str {
    match status {
        RecoveryStatus::InProgress => "in_progress",
        RecoveryStatus::Partial => "partial",
        RecoveryStatus::Completed => "completed",
    }
}

fn text_to_event_status(raw: &str) -> Result<RecoveryStatus, DbError> {
    match raw {
        "in_progress" => Ok(RecoveryStatus::InProgress),
        "partial" => Ok(RecoveryStatus::Partial),
        "completed" => Ok(RecoveryStatus::Completed),
        other => Err(DbError::MappingError(format!("unknown recovery status {other}"))),
    }
}

fn item_status_to_text(status: RecoveryItemStatus) -> &'static str {
    match status {
        RecoveryItemStatus::Pending => "pending",
        RecoveryItemStatus::Recovered => "recovered",
        RecoveryItemStatus::Waiting => "waiting",
        RecoveryItemStatus::Retried => "retried",
        RecoveryItemStatus::Failed => "failed",
    }
}

fn text_to_item_status(raw: &str) -> Result<RecoveryItemStatus, DbError> {
    match raw {
        "pending" => Ok(RecoveryItemStatus::Pending),
        "recovered" => Ok(RecoveryItemStatus::Recovered),
        "waiting" => Ok(RecoveryItemStatus::Waiting),
        "retried" => Ok(RecoveryItemStatus::Retried),
        "failed" => Ok(RecoveryItemStatus::Failed),
        other => Err(DbError::MappingError(format!("unknown recovery item status {other}"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

impl RecoveryRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn insert_event(&self, event: &RecoveryEvent) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO recovery_events
                    (id, node_id, trigger, status, tenants_total, tenants_recovered,
                     tenants_failed, tenants_waiting, started_at, completed_at, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    event.id.clone(),
                    event.node_id.clone(),
                    trigger_to_text(event.trigger),
                    event_status_to_text(event.status),
                    event.tenants_total,
                    event.tenants_recovered,
                    event.tenants_failed,
                    event.tenants_waiting,
                    event.started_at.to_rfc3339(),
                    event.completed_at.map(|t| t.to_rfc3339()),
                    event.report_json.clone(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn update_event(&self, event: &RecoveryEvent) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE recovery_events SET
                    status = ?2, tenants_recovered = ?3, tenants_failed = ?4,
                    tenants_waiting = ?5, completed_at = ?6, report_json = ?7
                 WHERE id = ?1",
                params![
                    event.id.clone(),
                    event_status_to_text(event.status),
                    event.tenants_recovered,
                    event.tenants_failed,
                    event.tenants_waiting,
                    event.completed_at.map(|t| t.to_rfc3339()),
                    event.report_json.clone(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn events_in_progress_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecoveryEvent>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, node_id, trigger, status, tenants_total, tenants_recovered,
                        tenants_failed, tenants_waiting, started_at, completed_at, report_json
                 FROM recovery_events
                 WHERE status != 'completed' AND started_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let trigger_raw: String = row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let status_raw: String = row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let started_raw: String = row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let completed_raw: Option<String> = row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            events.push(RecoveryEvent {
                id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                node_id: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                trigger: text_to_trigger(&trigger_raw).map_err(DomainError::from)?,
                status: text_to_event_status(&status_raw).map_err(DomainError::from)?,
                tenants_total: row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenants_recovered: row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenants_failed: row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenants_waiting: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                started_at: parse_timestamp(&started_raw).map_err(DomainError::from)?,
                completed_at: completed_raw.map(|raw| parse_timestamp(&raw)).transpose().map_err(DomainError::from)?,
                report_json: row.get(10).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            });
        }
        Ok(events)
    }

    pub async fn insert_item(&self, item: &RecoveryItem) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO recovery_items
                    (id, recovery_event_id, tenant_id, source_node_id, target_node_id,
                     status, reason, retry_count, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    item.id.clone(),
                    item.recovery_event_id.clone(),
                    item.tenant_id.clone(),
                    item.source_node_id.clone(),
                    item.target_node_id.clone(),
                    item_status_to_text(item.status),
                    item.reason.clone(),
                    item.retry_count,
                    item.started_at.to_rfc3339(),
                    item.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn update_item(&self, item: &RecoveryItem) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE recovery_items SET
                    target_node_id = ?2, status = ?3, reason = ?4,
                    retry_count = ?5, completed_at = ?6
                 WHERE id = ?1",
                params![
                    item.id.clone(),
                    item.target_node_id.clone(),
                    item_status_to_text(item.status),
                    item.reason.clone(),
                    item.retry_count,
                    item.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn items_for_event(&self, recovery_event_id: &str) -> Result<Vec<RecoveryItem>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, recovery_event_id, tenant_id, source_node_id, target_node_id,
                        status, reason, retry_count, started_at, completed_at
                 FROM recovery_items WHERE recovery_event_id = ?1",
                params![recovery_event_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let status_raw: String = row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let started_raw: String = row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let completed_raw: Option<String> = row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            items.push(RecoveryItem {
                id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                recovery_event_id: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenant_id: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                source_node_id: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                target_node_id: row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                status: text_to_item_status(&status_raw).map_err(DomainError::from)?,
                reason: row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                retry_count: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                started_at: parse_timestamp(&started_raw).map_err(DomainError::from)?,
                completed_at: completed_raw.map(|raw| parse_timestamp(&raw)).transpose().map_err(DomainError::from)?,
            });
        }
        Ok(items)
    }
}
