// [apps/control-plane/src/services/recovery.rs]
/*!
 * =================================================================
 * APARATO: RECOVERY MANAGER (V1.0 - CENTRAL STATE MACHINE)
 * CLASIFICACIÓN: SERVICIO DE DOMINIO (ESTRATO L1-APP)
 * RESPONSABILIDAD: REUBICAR LOS TENANTS DE UN NODO MUERTO
 *
 * El éxito parcial es un resultado normal: un evento queda abierto
 * hasta que expira el tope de 24 horas o cada renglón alcanza un
 * estado terminal. La notificación al administrador es el canal
 * autoritativo para la acción del operador — no hay reintento
 * silencioso más allá de lo que este módulo agota explícitamente.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_fleet::{find_placement_excluding, DEFAULT_REQUIRED_MB};
use botplane_domain_models::{
    BotProfile, NodeStatus, RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger,
    REASON_MAX_RETRIES_EXCEEDED, REASON_NO_CAPACITY,
};
use botplane_infra_channel::ChannelRegistry;
use botplane_infra_db::{FleetRepository, NotificationRepository, RecoveryRepository};
use botplane_infra_proxy::ReverseProxyClient;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::state::NodeRegistry;

pub struct RecoveryManager {
    fleet_repo: Arc<FleetRepository>,
    recovery_repo: Arc<RecoveryRepository>,
    notifications: Arc<NotificationRepository>,
    node_registry: NodeRegistry,
    channel_registry: ChannelRegistry,
    routing: Arc<ReverseProxyClient>,
    admin_notification_email: String,
    recovery_time_cap_hours: i64,
    recovery_item_retry_cap: i64,
}

impl RecoveryManager {
    pub fn new(
        fleet_repo: Arc<FleetRepository>,
        recovery_repo: Arc<RecoveryRepository>,
        notifications: Arc<NotificationRepository>,
        node_registry: NodeRegistry,
        channel_registry: ChannelRegistry,
        routing: Arc<ReverseProxyClient>,
        admin_notification_email: String,
        recovery_time_cap_hours: i64,
        recovery_item_retry_cap: i64,
    ) -> Self {
        Self {
            fleet_repo,
            recovery_repo,
            notifications,
            node_registry,
            channel_registry,
            routing,
            admin_notification_email,
            recovery_time_cap_hours,
            recovery_item_retry_cap,
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

    /// Reconstruye el comando `bot.import` a partir del perfil de un
    /// tenant, con caída segura cuando el perfil falta.
    async fn build_import_payload(&self, bot_id: &str) -> serde_json::Value {
        let profile = self.fleet_repo.get_bot_profile(bot_id).await.unwrap_or(None);
        json!({
            "image": BotProfile::image_or_fallback(profile.as_ref()),
            "env": BotProfile::env_or_fallback(profile.as_ref()),
        })
    }

    /// Punto de entrada: un nodo cruzó a `unhealthy`, o se disparó
    /// manualmente. Enumera a sus tenants y coloca a cada uno en el
    /// mejor destino disponible, dejando `waiting` a los que no
    /// caben todavía.
    #[instrument(skip(self))]
    pub async fn trigger_recovery(&self, dead_node_id: &str, trigger: RecoveryTrigger) -> Result<RecoveryEvent, DomainError> {
        let instances = self.fleet_repo.instances_on_node(dead_node_id).await?;
        let now = Utc::now();

        let mut event = RecoveryEvent {
            id: Uuid::new_v4().to_string(),
            node_id: dead_node_id.to_string(),
            trigger,
            status: RecoveryStatus::InProgress,
            tenants_total: instances.len() as i64,
            tenants_recovered: 0,
            tenants_failed: 0,
            tenants_waiting: 0,
            started_at: now,
            completed_at: None,
            report_json: None,
        };
        self.recovery_repo.insert_event(&event).await?;

        let mut recovered = 0i64;
        let mut waiting = 0i64;

        for instance in &instances {
            let nodes = self.node_registry.list_all().await;
            let placement = find_placement_excluding(&nodes, &[dead_node_id.to_string()], DEFAULT_REQUIRED_MB);

            let item = match placement {
                Some(choice) => {
                    let import_payload = self.build_import_payload(&instance.id).await;
                    let placed = self
                        .place_tenant_on(&instance.id, dead_node_id, &choice.node_id, &choice.host, import_payload)
                        .await;
                    match placed {
                        Ok(()) => {
                            recovered += 1;
                            RecoveryItem {
                                id: Uuid::new_v4().to_string(),
                                recovery_event_id: event.id.clone(),
                                tenant_id: instance.tenant_id.clone(),
                                source_node_id: dead_node_id.to_string(),
                                target_node_id: Some(choice.node_id.clone()),
                                status: RecoveryItemStatus::Recovered,
                                reason: None,
                                retry_count: 0,
                                started_at: now,
                                completed_at: Some(Utc::now()),
                            }
                        }
                        Err(err) => {
                            warn!(tenant_id = %instance.tenant_id, error = %err, "🚑 [RECOVERY_PLACEMENT_FAILED]");
                            waiting += 1;
                            RecoveryItem {
                                id: Uuid::new_v4().to_string(),
                                recovery_event_id: event.id.clone(),
                                tenant_id: instance.tenant_id.clone(),
                                source_node_id: dead_node_id.to_string(),
                                target_node_id: None,
                                status: RecoveryItemStatus::Waiting,
                                reason: Some(REASON_NO_CAPACITY.to_string()),
                                retry_count: 0,
                                started_at: now,
                                completed_at: None,
                            }
                        }
                    }
                }
                None => {
                    waiting += 1;
                    RecoveryItem {
                        id: Uuid::new_v4().to_string(),
                        recovery_event_id: event.id.clone(),
                        tenant_id: instance.tenant_id.clone(),
                        source_node_id: dead_node_id.to_string(),
                        target_node_id: None,
                        status: RecoveryItemStatus::Waiting,
                        reason: Some(REASON_NO_CAPACITY.to_string()),
                        retry_count: 0,
                        started_at: now,
                        completed_at: None,
                    }
                }
            };
            self.recovery_repo.insert_item(&item).await?;
        }

        event.tenants_recovered = recovered;
        event.tenants_waiting = waiting;
        event.status = if waiting == 0 { RecoveryStatus::Completed } else { RecoveryStatus::Partial };
        if waiting == 0 {
            event.completed_at = Some(Utc::now());
        }
        self.recovery_repo.update_event(&event).await?;

        info!(node_id = dead_node_id, recovered, waiting, "🚑 [RECOVERY_TRIGGERED]");
        self.notify_admin(
            "recovery_completed",
            json!({ "event_id": event.id, "node_id": dead_node_id, "recovered": recovered, "waiting": waiting }),
        )
        .await;

        Ok(event)
    }

    /// Empuja `bot.import`, reasigna el ruteo y ajusta capacidad; el
    /// llamador decide qué estado de renglón corresponde al resultado.
    async fn place_tenant_on(
        &self,
        bot_id: &str,
        source_node_id: &str,
        target_node_id: &str,
        target_host: &str,
        import_payload: serde_json::Value,
    ) -> Result<(), DomainError> {
        self.channel_registry.send_command(target_node_id, "bot.import", import_payload).await?;
        self.routing.reassign_tenant(bot_id, target_host, 0).await.ok();
        self.node_registry.add_node_capacity(target_node_id, DEFAULT_REQUIRED_MB).await?;
        let _ = source_node_id;
        Ok(())
    }

    /// Reintenta la colocación de todo renglón `waiting` en eventos
    /// abiertos; invocado tanto por el ciclo periódico como por el
    /// registro de un nodo nuevo.
    #[instrument(skip(self))]
    pub async fn check_and_retry_waiting(&self) -> Result<(), DomainError> {
        let open_events = self.recovery_repo.events_in_progress_started_before(Utc::now()).await?;

        for mut event in open_events {
            let now = Utc::now();
            let items = self.recovery_repo.items_for_event(&event.id).await?;
            let waiting_items: Vec<RecoveryItem> = items.into_iter().filter(|i| i.status == RecoveryItemStatus::Waiting).collect();
            if waiting_items.is_empty() {
                continue;
            }

            let has_expired = now - event.started_at > chrono::Duration::hours(self.recovery_time_cap_hours);
            if has_expired {
                let expired_count = waiting_items.len();
                for mut item in waiting_items {
                    item.status = RecoveryItemStatus::Failed;
                    item.reason = Some(REASON_MAX_RETRIES_EXCEEDED.to_string());
                    item.completed_at = Some(now);
                    self.recovery_repo.update_item(&item).await?;
                }
                event.status = RecoveryStatus::Completed;
                event.completed_at = Some(now);
                self.recount_event(&mut event).await?;
                self.notify_admin(
                    "waiting_tenants_expired",
                    json!({ "event_id": event.id, "count": expired_count, "reason": REASON_MAX_RETRIES_EXCEEDED }),
                )
                .await;
                continue;
            }

            let mut retry_cap_exceeded = 0usize;

            for mut item in waiting_items {
                if item.retry_count >= self.recovery_item_retry_cap {
                    item.status = RecoveryItemStatus::Failed;
                    item.reason = Some(REASON_MAX_RETRIES_EXCEEDED.to_string());
                    item.completed_at = Some(now);
                    self.recovery_repo.update_item(&item).await?;
                    retry_cap_exceeded += 1;
                    continue;
                }

                let nodes = self.node_registry.list_all().await;
                let placement = find_placement_excluding(&nodes, &[item.source_node_id.clone()], DEFAULT_REQUIRED_MB);

                match placement {
                    Some(choice) => {
                        let import_payload = self.build_import_payload(&item.tenant_id).await;
                        match self
                            .place_tenant_on(&item.tenant_id, &item.source_node_id, &choice.node_id, &choice.host, import_payload)
                            .await
                        {
                            Ok(()) => {
                                item.status = RecoveryItemStatus::Retried;
                                item.target_node_id = Some(choice.node_id.clone());
                                item.completed_at = Some(now);
                            }
                            Err(err) => {
                                warn!(tenant_id = %item.tenant_id, error = %err, "🚑 [RECOVERY_RETRY_FAILED]");
                                item.retry_count += 1;
                            }
                        }
                    }
                    None => {
                        item.retry_count += 1;
                    }
                }
                self.recovery_repo.update_item(&item).await?;
            }

            let remaining_waiting = self
                .recovery_repo
                .items_for_event(&event.id)
                .await?
                .into_iter()
                .filter(|i| i.status == RecoveryItemStatus::Waiting)
                .count();

            if remaining_waiting == 0 {
                event.status = RecoveryStatus::Completed;
                event.completed_at = Some(now);
            }
            self.recount_event(&mut event).await?;

            if retry_cap_exceeded > 0 {
                self.notify_admin(
                    "waiting_tenants_expired",
                    json!({ "event_id": event.id, "count": retry_cap_exceeded, "reason": REASON_MAX_RETRIES_EXCEEDED }),
                )
                .await;
            }
        }

        Ok(())
    }

    async fn recount_event(&self, event: &mut RecoveryEvent) -> Result<(), DomainError> {
        let items = self.recovery_repo.items_for_event(&event.id).await?;
        event.tenants_failed = items.iter().filter(|i| i.status == RecoveryItemStatus::Failed).count() as i64;
        event.tenants_waiting = items.iter().filter(|i| i.status == RecoveryItemStatus::Waiting).count() as i64;
        event.tenants_recovered = items
            .iter()
            .filter(|i| matches!(i.status, RecoveryItemStatus::Recovered | RecoveryItemStatus::Retried))
            .count() as i64;
        self.recovery_repo.update_event(event).await
    }

    /// Gancho de registro de nodo: nueva capacidad puede resolver a los
    /// tenants que esperan plaza.
    #[instrument(skip(self))]
    pub async fn on_node_registered(&self, node_id: &str) -> Result<(), DomainError> {
        info!(node_id, "🆕 [RECOVERY_RETRY_HOOK]: new node registered, re-checking waiting tenants");
        self.check_and_retry_waiting().await
    }

    /// Bucle de fondo que reintenta periódicamente los renglones
    /// `waiting`, independiente del gancho de registro de nodo.
    pub async fn run(self: Arc<Self>, retry_interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(retry_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.check_and_retry_waiting().await {
                        warn!(error = %err, "🚑 [RECOVERY_RETRY_LOOP_FAILED]");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🚑 [RECOVERY_RETRY_LOOP_STOPPED]");
    }
}
