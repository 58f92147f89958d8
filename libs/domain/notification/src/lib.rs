// [libs/domain/notification/src/lib.rs]
/*!
 * =================================================================
 * APARATO: NOTIFICATION QUEUE DOMAIN MODEL (V1.0 - HERALD)
 * CLASIFICACIÓN: DOMINIO DE MENSAJERÍA (ESTRATO L2)
 * RESPONSABILIDAD: ENTIDAD Y CÁLCULO DE BACKOFF DE LA COLA DE AVISOS
 * =================================================================
 */

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub id: String,
    pub tenant_id: Option<String>,
    pub email_type: String,
    pub recipient_email: String,
    pub payload: String,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Resultado puro de aplicar una falla a un renglón de la cola: el nuevo
/// estado, el momento del próximo reintento (si aplica) y el contador
/// de intentos actualizado. Separado de la persistencia para poder
/// verificarlo con pruebas basadas en propiedades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffOutcome {
    pub status: NotificationStatus,
    pub attempts: i32,
    pub retry_after: Option<DateTime<Utc>>,
}

/// Calcula el resultado de `mark_failed`: backoff exponencial `4^(N-1)`
/// minutos, acotado por `retry_backoff_cap_minutes` para proteger
/// renglones con un `max_attempts` mal configurado, y transición a
/// `dead_letter` cuando se agotan los intentos.
pub fn compute_backoff(
    attempts_before_failure: i32,
    max_attempts: i32,
    now: DateTime<Utc>,
    retry_backoff_cap_minutes: i64,
) -> BackoffOutcome {
    let new_attempts = attempts_before_failure + 1;

    if new_attempts >= max_attempts {
        return BackoffOutcome {
            status: NotificationStatus::DeadLetter,
            attempts: new_attempts,
            retry_after: None,
        };
    }

    let exponent = (new_attempts - 1).max(0) as u32;
    let raw_minutes = 4i64.saturating_pow(exponent);
    let clamped_minutes = raw_minutes.min(retry_backoff_cap_minutes);

    BackoffOutcome {
        status: NotificationStatus::Failed,
        attempts: new_attempts,
        retry_after: Some(now + Duration::minutes(clamped_minutes)),
    }
}

/// Un renglón `pending` es elegible para despacho cuando no tiene
/// `retry_after` o éste ya venció.
pub fn is_due(entry: &NotificationQueueEntry, now: DateTime<Utc>) -> bool {
    entry.status == NotificationStatus::Pending
        && entry.retry_after.map(|t| t <= now).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CAP: i64 = 100_000;

    #[test]
    fn backoff_follows_powers_of_four() {
        let now = Utc::now();
        let first = compute_backoff(0, 3, now, NO_CAP);
        assert_eq!(first.status, NotificationStatus::Failed);
        assert_eq!(first.attempts, 1);
        assert_eq!(first.retry_after, Some(now + Duration::minutes(1)));

        let second = compute_backoff(1, 3, now, NO_CAP);
        assert_eq!(second.retry_after, Some(now + Duration::minutes(4)));
    }

    #[test]
    fn third_failure_goes_dead_letter_at_default_max_attempts() {
        let now = Utc::now();
        let outcome = compute_backoff(2, 3, now, NO_CAP);
        assert_eq!(outcome.status, NotificationStatus::DeadLetter);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retry_after, None);
    }

    #[test]
    fn backoff_cap_protects_misconfigured_max_attempts() {
        let now = Utc::now();
        // attempts_before_failure=4 -> exponent 4 -> 256 minutes uncapped.
        let outcome = compute_backoff(4, 10, now, 60);
        assert_eq!(outcome.retry_after, Some(now + Duration::minutes(60)));
    }

    #[test]
    fn is_due_accepts_null_or_past_retry_after() {
        let now = Utc::now();
        let mut entry = NotificationQueueEntry {
            id: "n1".into(),
            tenant_id: Some("t1".into()),
            email_type: "recovery_report".into(),
            recipient_email: "ops@example.com".into(),
            payload: "{}".into(),
            status: NotificationStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_attempt_at: None,
            last_error: None,
            retry_after: None,
            sent_at: None,
        };
        assert!(is_due(&entry, now));
        entry.retry_after = Some(now + Duration::minutes(5));
        assert!(!is_due(&entry, now));
        entry.retry_after = Some(now - Duration::minutes(5));
        assert!(is_due(&entry, now));
    }
}
