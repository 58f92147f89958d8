// [libs/infra/db/src/repositories/notification.rs]
/*!
 * Cola de avisos por correo. El repositorio sólo persiste; el cálculo de
 * backoff vive en `botplane_domain_notification::compute_backoff` y se
 * invoca desde el servicio despachador en el binario de aplicación.
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_notification::{NotificationQueueEntry, NotificationStatus};
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct NotificationRepository {
    client: Arc<DbClient>,
}

fn status_to_text(status: NotificationStatus) -> &'static str {
    match status {
        NotificationStatus::Pending => "pending",
        NotificationStatus::Sent => "sent",
        NotificationStatus::Failed => "failed",
        NotificationStatus::DeadLetter => "dead_letter",
    }
}

fn text_to_status(raw: &str) -> Result<NotificationStatus, DbError> {
    match raw {
        "pending" => Ok(NotificationStatus::Pending),
        "sent" => Ok(NotificationStatus::Sent),
        "failed" => Ok(NotificationStatus::Failed),
        "dead_letter" => Ok(NotificationStatus::DeadLetter),
        other => Err(DbError::MappingError(format!("unknown notification status {other}"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn row_to_entry(row: &libsql::Row) -> Result<NotificationQueueEntry, DbError> {
    let status_raw: String = row.get(5)?;
    let last_attempt_raw: Option<String> = row.get(8)?;
    let retry_after_raw: Option<String> = row.get(10)?;
    let sent_at_raw: Option<String> = row.get(11)?;

    Ok(NotificationQueueEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        email_type: row.get(2)?,
        recipient_email: row.get(3)?,
        payload: row.get(4)?,
        status: text_to_status(&status_raw)?,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        last_attempt_at: last_attempt_raw.map(|raw| parse_timestamp(&raw)).transpose()?,
        last_error: row.get(9)?,
        retry_after: retry_after_raw.map(|raw| parse_timestamp(&raw)).transpose()?,
        sent_at: sent_at_raw.map(|raw| parse_timestamp(&raw)).transpose()?,
    })
}

impl NotificationRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn enqueue(
        &self,
        tenant_id: Option<&str>,
        email_type: &str,
        recipient_email: &str,
        payload: &str,
        max_attempts: i32,
    ) -> Result<NotificationQueueEntry, DomainError> {
        let entry = NotificationQueueEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            email_type: email_type.to_string(),
            recipient_email: recipient_email.to_string(),
            payload: payload.to_string(),
            status: NotificationStatus::Pending,
            attempts: 0,
            max_attempts,
            last_attempt_at: None,
            last_error: None,
            retry_after: None,
            sent_at: None,
        };

        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO notification_queue
                    (id, tenant_id, email_type, recipient_email, payload, status,
                     attempts, max_attempts, last_attempt_at, last_error, retry_after, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, NULL, NULL)",
                params![
                    entry.id.clone(),
                    entry.tenant_id.clone(),
                    entry.email_type.clone(),
                    entry.recipient_email.clone(),
                    entry.payload.clone(),
                    status_to_text(entry.status),
                    entry.attempts,
                    entry.max_attempts,
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(entry)
    }

    pub async fn due_entries(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<NotificationQueueEntry>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, tenant_id, email_type, recipient_email, payload, status,
                        attempts, max_attempts, last_attempt_at, last_error, retry_after, sent_at
                 FROM notification_queue
                 WHERE status = 'pending' AND (retry_after IS NULL OR retry_after <= ?1)
                 ORDER BY last_attempt_at ASC NULLS FIRST
                 LIMIT ?2",
                params![now.to_rfc3339(), limit],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            entries.push(row_to_entry(&row).map_err(DomainError::from)?);
        }
        Ok(entries)
    }

    pub async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE notification_queue
                 SET status = 'sent', sent_at = ?2, last_attempt_at = ?2, last_error = NULL
                 WHERE id = ?1",
                params![id, sent_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        id: &str,
        new_status: NotificationStatus,
        new_attempts: i32,
        retry_after: Option<DateTime<Utc>>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE notification_queue
                 SET status = ?2, attempts = ?3, retry_after = ?4, last_error = ?5, last_attempt_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    status_to_text(new_status),
                    new_attempts,
                    retry_after.map(|t| t.to_rfc3339()),
                    error_message,
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }
}
