// [libs/domain/models/src/recovery.rs]
/*!
 * Entidades del estado de recuperación: una corrida de recuperación
 * (RecoveryEvent) y sus renglones por tenant (RecoveryItem).
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTrigger {
    HeartbeatTimeout,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    InProgress,
    Partial,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub id: String,
    pub node_id: String,
    pub trigger: RecoveryTrigger,
    pub status: RecoveryStatus,
    pub tenants_total: i64,
    pub tenants_recovered: i64,
    pub tenants_failed: i64,
    pub tenants_waiting: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report_json: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryItemStatus {
    Pending,
    Recovered,
    Waiting,
    Retried,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryItem {
    pub id: String,
    pub recovery_event_id: String,
    pub tenant_id: String,
    pub source_node_id: String,
    pub target_node_id: Option<String>,
    pub status: RecoveryItemStatus,
    pub reason: Option<String>,
    pub retry_count: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Causa de terminación reportada cuando un renglón agota sus reintentos
/// o cuando el evento entero excede el tope de 24 horas.
pub const REASON_NO_CAPACITY: &str = "no_capacity";
pub const REASON_MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";

/// Tope de reintentos por renglón y ventana de vida del evento, ambos
/// fijados por la propiedad "Recovery retry bound".
pub const RECOVERY_ITEM_RETRY_CAP: i64 = 5;
pub const RECOVERY_EVENT_TIME_CAP_HOURS: i64 = 24;

impl RecoveryEvent {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at > chrono::Duration::hours(RECOVERY_EVENT_TIME_CAP_HOURS)
    }
}

impl RecoveryItem {
    pub fn has_exhausted_retries(&self) -> bool {
        self.retry_count >= RECOVERY_ITEM_RETRY_CAP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(retry_count: i64) -> RecoveryItem {
        RecoveryItem {
            id: "item-1".into(),
            recovery_event_id: "evt-1".into(),
            tenant_id: "tenant-1".into(),
            source_node_id: "dead-node".into(),
            target_node_id: None,
            status: RecoveryItemStatus::Waiting,
            reason: Some(REASON_NO_CAPACITY.to_string()),
            retry_count,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn retry_cap_is_five() {
        assert!(!item(4).has_exhausted_retries());
        assert!(item(5).has_exhausted_retries());
        assert!(item(7).has_exhausted_retries());
    }

    #[test]
    fn event_expires_after_24_hours() {
        let mut event = RecoveryEvent {
            id: "evt-1".into(),
            node_id: "dead-node".into(),
            trigger: RecoveryTrigger::HeartbeatTimeout,
            status: RecoveryStatus::Partial,
            tenants_total: 1,
            tenants_recovered: 0,
            tenants_failed: 0,
            tenants_waiting: 1,
            started_at: Utc::now() - chrono::Duration::hours(25),
            completed_at: None,
            report_json: None,
        };
        assert!(event.has_expired(Utc::now()));
        event.started_at = Utc::now();
        assert!(!event.has_expired(Utc::now()));
    }
}
