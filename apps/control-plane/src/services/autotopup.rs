// [apps/control-plane/src/services/autotopup.rs]
/*!
 * =================================================================
 * APARATO: AUTO-TOP-UP CONTROLLER (V1.0)
 * CLASIFICACIÓN: SERVICIO DE DOMINIO (ESTRATO L1-APP)
 * RESPONSABILIDAD: RECARGA DE CRÉDITO POR UMBRAL DE USO O POR CALENDARIO
 *
 * `usage_charge_in_flight` es el mutex distribuido del modo por uso: se
 * levanta antes de invocar al procesador y se baja siempre, éxito o
 * fallo, para que una recarga nunca quede atascada en vuelo a mitad de
 * un reinicio del proceso.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_billing::{AutoTopupSettings, TransactionType, AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER};
use botplane_domain_errors::DomainError;
use botplane_infra_db::{LedgerRepository, NotificationRepository};
use botplane_infra_payments::{PaymentProcessor, StripeLikeProcessor};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};

use crate::state::KeyedMutexMap;

pub struct AutoTopupController {
    ledger: Arc<LedgerRepository>,
    notifications: Arc<NotificationRepository>,
    processor: Arc<StripeLikeProcessor>,
    tenant_locks: KeyedMutexMap,
    admin_notification_email: String,
}

/// El trait de pagos no expone un `charge()` genérico: se adapta contra
/// el método de pago por defecto del tenant, tal como haría un flujo de
/// compra manual.
async fn charge_default_method<P: PaymentProcessor>(
    processor: &P,
    tenant_id: &str,
    amount_cents: i64,
    idempotency_key: &str,
) -> Result<String, DomainError> {
    let mut methods = processor.list_payment_methods(tenant_id).await?;
    let default_index = methods.iter().position(|m| m.is_default);
    let method = match default_index {
        Some(index) => methods.swap_remove(index),
        None => methods
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::InvalidUpstream(format!("tenant {tenant_id} has no payment method on file")))?,
    };
    processor
        .charge_saved_method(tenant_id, &method.id, amount_cents, idempotency_key)
        .await
}

impl AutoTopupController {
    pub fn new(
        ledger: Arc<LedgerRepository>,
        notifications: Arc<NotificationRepository>,
        processor: Arc<StripeLikeProcessor>,
        tenant_locks: KeyedMutexMap,
        admin_notification_email: String,
    ) -> Self {
        Self {
            ledger,
            notifications,
            processor,
            tenant_locks,
            admin_notification_email,
        }
    }

    async fn notify_admin(&self, email_type: &str, payload: serde_json::Value) {
        if let Err(err) = self
            .notifications
            .enqueue(None, email_type, &self.admin_notification_email, &payload.to_string(), 3)
            .await
        {
            warn!(error = %err, email_type, "💌 [NOTIFY_ADMIN_FAILED]: could not enqueue admin notification");
        }
    }

    /// Llamado tras cualquier débito del libro mayor; sin efecto si el
    /// tenant no tiene la auto-recarga por uso habilitada o su saldo ya
    /// está por encima del umbral.
    #[instrument(skip(self))]
    pub async fn maybe_trigger_usage_topup(&self, tenant_id: &str) -> Result<(), DomainError> {
        let _guard = self.tenant_locks.acquire(tenant_id).await;

        let Some(mut settings) = self.ledger.get_auto_topup_settings(tenant_id).await? else {
            return Ok(());
        };
        if !settings.usage_enabled {
            return Ok(());
        }

        let balance = self.ledger.get_balance(tenant_id).await?;
        if balance >= settings.usage_threshold {
            return Ok(());
        }

        if settings.usage_charge_in_flight {
            return Ok(());
        }
        settings.usage_charge_in_flight = true;
        self.ledger.upsert_auto_topup_settings(&settings).await?;

        let outcome = self.attempt_usage_charge(tenant_id, &settings).await;

        settings.usage_charge_in_flight = false;
        match outcome {
            Ok(()) => {
                settings.usage_consecutive_failures = 0;
            }
            Err(ref err) => {
                warn!(tenant_id, error = %err, "💳 [AUTOTOPUP_USAGE_FAILED]");
                settings.usage_consecutive_failures += 1;
                if settings.usage_consecutive_failures >= AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER {
                    settings.usage_enabled = false;
                    self.notify_admin(
                        "autotopup_circuit_broken",
                        serde_json::json!({ "tenant_id": tenant_id, "mode": "usage" }),
                    )
                    .await;
                }
            }
        }
        self.ledger.upsert_auto_topup_settings(&settings).await?;
        outcome
    }

    async fn attempt_usage_charge(&self, tenant_id: &str, settings: &AutoTopupSettings) -> Result<(), DomainError> {
        let idempotency_key = format!("autotopup-usage-{tenant_id}-{}", Utc::now().timestamp());
        charge_default_method(&*self.processor, tenant_id, settings.usage_topup_amount, &idempotency_key).await?;

        self.ledger
            .credit(
                tenant_id,
                settings.usage_topup_amount,
                TransactionType::AutoTopupUsage,
                Some("usage-triggered auto top-up"),
                Some(idempotency_key.as_str()),
                Some("auto_topup"),
                None,
            )
            .await?;
        info!(tenant_id, amount = settings.usage_topup_amount, "💰 [AUTOTOPUP_USAGE_CREDITED]");
        Ok(())
    }

    /// Sondeado periódicamente; recorre los tenants cuyo `schedule_next_at`
    /// ya venció e intenta la recarga de cada uno con exclusión por
    /// tenant, igual que el modo por uso.
    #[instrument(skip(self))]
    pub async fn run_schedule_topups(&self) -> Result<usize, DomainError> {
        let now = Utc::now();
        let tenant_ids = self.ledger.tenants_due_for_schedule_topup(now).await?;
        let mut processed = 0usize;
        for tenant_id in tenant_ids {
            if self.run_schedule_topup_for(&tenant_id, now).await.is_ok() {
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn run_schedule_topup_for(&self, tenant_id: &str, now: chrono::DateTime<Utc>) -> Result<(), DomainError> {
        let _guard = self.tenant_locks.acquire(tenant_id).await;
        let Some(mut settings) = self.ledger.get_auto_topup_settings(tenant_id).await? else {
            return Ok(());
        };
        if !settings.schedule_enabled {
            return Ok(());
        }

        let window_marker = settings.schedule_next_at.unwrap_or(now).timestamp();
        let reference_id = format!("autotopup-schedule-{tenant_id}-{window_marker}");
        let idempotency_key = reference_id.clone();

        let charge_result = charge_default_method(&*self.processor, tenant_id, settings.schedule_amount, &idempotency_key).await;

        match charge_result {
            Ok(_) => {
                self.ledger
                    .credit(
                        tenant_id,
                        settings.schedule_amount,
                        TransactionType::AutoTopupSchedule,
                        Some("schedule-triggered auto top-up"),
                        Some(reference_id.as_str()),
                        Some("auto_topup"),
                        None,
                    )
                    .await?;
                settings.schedule_consecutive_failures = 0;
                settings.schedule_next_at = Some(now + chrono::Duration::hours(settings.schedule_interval_hours));
            }
            Err(ref err) => {
                warn!(tenant_id, error = %err, "💳 [AUTOTOPUP_SCHEDULE_FAILED]");
                settings.schedule_consecutive_failures += 1;
                if settings.schedule_consecutive_failures >= AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER {
                    settings.schedule_enabled = false;
                    self.notify_admin(
                        "autotopup_circuit_broken",
                        serde_json::json!({ "tenant_id": tenant_id, "mode": "schedule" }),
                    )
                    .await;
                }
            }
        }

        self.ledger.upsert_auto_topup_settings(&settings).await?;
        charge_result.map(|_| ())
    }

    /// Bucle de fondo que sondea los tenants con recarga por calendario
    /// vencida; el modo por uso no necesita un bucle propio porque se
    /// dispara desde cada débito del libro mayor.
    pub async fn run(self: Arc<Self>, poll_interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_schedule_topups().await {
                        warn!(error = %err, "💳 [AUTOTOPUP_SCHEDULE_LOOP_FAILED]");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("💳 [AUTOTOPUP_SCHEDULE_LOOP_STOPPED]");
    }
}
