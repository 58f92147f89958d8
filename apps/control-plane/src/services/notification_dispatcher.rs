// [apps/control-plane/src/services/notification_dispatcher.rs]
/*!
 * =================================================================
 * APARATO: NOTIFICATION DISPATCHER (V1.0 - HERALD)
 * CLASIFICACIÓN: SERVICIO DE FONDO (ESTRATO L1-APP)
 * RESPONSABILIDAD: ENVIAR LOS RENGLONES PENDIENTES DE LA COLA DE AVISOS
 *
 * Ningún proveedor de correo real existe en la pila de dependencias del
 * plano de control; `TracingNotificationSender` es el único emisor
 * disponible y registra cada envío como un evento estructurado. Un
 * proveedor real (SES, Postmark) se conectaría implementando el mismo
 * trait sin tocar el bucle de despacho.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_notification::{compute_backoff, NotificationQueueEntry};
use botplane_infra_db::NotificationRepository;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};

const DISPATCH_BATCH_SIZE: i64 = 50;

pub trait NotificationSender: Send + Sync {
    async fn send(&self, entry: &NotificationQueueEntry) -> Result<(), DomainError>;
}

/// Emisor de referencia: no habla con ningún proveedor externo, sólo deja
/// un rastro estructurado. Suficiente para un entorno sin credenciales de
/// correo reales; un operador con un proveedor real sustituye esta
/// implementación del trait.
pub struct TracingNotificationSender;

impl NotificationSender for TracingNotificationSender {
    async fn send(&self, entry: &NotificationQueueEntry) -> Result<(), DomainError> {
        info!(
            recipient = %entry.recipient_email,
            email_type = %entry.email_type,
            tenant_id = ?entry.tenant_id,
            "✉️ [NOTIFICATION_SENT]: {}",
            entry.payload
        );
        Ok(())
    }
}

pub struct NotificationDispatcher<S: NotificationSender = TracingNotificationSender> {
    repo: Arc<NotificationRepository>,
    sender: S,
    backoff_cap_minutes: i64,
    dispatch_interval: std::time::Duration,
}

impl<S: NotificationSender> NotificationDispatcher<S> {
    pub fn new(repo: Arc<NotificationRepository>, sender: S, backoff_cap_minutes: i64, dispatch_interval: std::time::Duration) -> Self {
        Self {
            repo,
            sender,
            backoff_cap_minutes,
            dispatch_interval,
        }
    }

    #[instrument(skip(self))]
    pub async fn dispatch_due(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let due = self.repo.due_entries(now, DISPATCH_BATCH_SIZE).await.map_err(|e| anyhow::anyhow!(e))?;
        let mut sent = 0usize;

        for entry in due {
            match self.sender.send(&entry).await {
                Ok(()) => {
                    self.repo.mark_sent(&entry.id, now).await.map_err(|e| anyhow::anyhow!(e))?;
                    sent += 1;
                }
                Err(err) => {
                    warn!(notification_id = %entry.id, error = %err, "✉️ [NOTIFICATION_SEND_FAILED]");
                    let outcome = compute_backoff(entry.attempts, entry.max_attempts, now, self.backoff_cap_minutes);
                    self.repo
                        .mark_failed(&entry.id, outcome.status, outcome.attempts, outcome.retry_after, &err.to_string(), now)
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                }
            }
        }

        Ok(sent)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.dispatch_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.dispatch_due().await {
                        warn!(error = %err, "✉️ [NOTIFICATION_DISPATCH_FAILED]");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("✉️ [NOTIFICATION_DISPATCHER_STOPPED]");
    }
}
