// [apps/control-plane/src/services/migration.rs]
/*!
 * =================================================================
 * APARATO: MIGRATION ENGINE (V1.0)
 * CLASIFICACIÓN: SERVICIO DE DOMINIO (ESTRATO L1-APP)
 * RESPONSABILIDAD: REUBICACIÓN ORDENADA DE UN TENANT ENTRE NODOS
 *
 * Las seis etapas del canal de comando se emiten en orden estricto; si
 * cualquiera falla, ni la tabla de ruteo ni el node_id persistido se
 * tocan. La contabilidad de capacidad y la reasignación de ruteo sólo
 * ocurren tras el éxito de las seis.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_fleet::{find_placement_excluding, DEFAULT_REQUIRED_MB};
use botplane_domain_models::{BillingState, BotInstance, BotProfile, NodeStatus};
use botplane_infra_channel::ChannelRegistry;
use botplane_infra_db::{FleetRepository, NotificationRepository};
use botplane_infra_proxy::ReverseProxyClient;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::state::NodeRegistry;

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub success: bool,
    pub bot_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub downtime_ms: i64,
    pub error: Option<String>,
}

pub struct MigrationEngine {
    fleet_repo: Arc<FleetRepository>,
    notifications: Arc<NotificationRepository>,
    node_registry: NodeRegistry,
    channel_registry: ChannelRegistry,
    routing: Arc<ReverseProxyClient>,
    admin_notification_email: String,
}

impl MigrationEngine {
    pub fn new(
        fleet_repo: Arc<FleetRepository>,
        notifications: Arc<NotificationRepository>,
        node_registry: NodeRegistry,
        channel_registry: ChannelRegistry,
        routing: Arc<ReverseProxyClient>,
        admin_notification_email: String,
    ) -> Self {
        Self {
            fleet_repo,
            notifications,
            node_registry,
            channel_registry,
            routing,
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

    /// Mueve a `instance` hacia `target_node`, eligiendo un destino por
    /// colocación cuando no se especifica uno. Las seis etapas deben
    /// tener éxito todas, o nada se persiste.
    #[instrument(skip(self, instance))]
    pub async fn migrate_tenant(&self, instance: &BotInstance, target_node: Option<&str>) -> Result<MigrationResult, DomainError> {
        let source_node_id = instance
            .node_id
            .clone()
            .ok_or_else(|| DomainError::InvalidInput(format!("bot {} has no current node to migrate from", instance.id)))?;

        let target = match target_node {
            Some(explicit) => {
                if explicit == source_node_id {
                    return Err(DomainError::InvalidInput("migration target must differ from the source node".into()));
                }
                let node = self
                    .node_registry
                    .get(explicit)
                    .await
                    .ok_or_else(|| DomainError::NotFound(format!("node {explicit}")))?;
                (node.id, node.host)
            }
            None => {
                let nodes = self.node_registry.list_all().await;
                let choice = find_placement_excluding(&nodes, &[source_node_id.clone()], DEFAULT_REQUIRED_MB)
                    .ok_or(DomainError::NoCapacity)?;
                (choice.node_id, choice.host)
            }
        };
        let (target_node_id, _target_host) = target;

        let channel_name = instance.channel_name();
        let archive_filename = instance.archive_filename();

        let steps: Result<(), DomainError> = async {
            self.channel_registry
                .send_command(&source_node_id, "bot.export", json!({ "bot_id": channel_name, "archive": archive_filename }))
                .await?;
            self.channel_registry
                .send_command(&source_node_id, "backup.upload", json!({ "archive": archive_filename }))
                .await?;
            self.channel_registry
                .send_command(&target_node_id, "backup.download", json!({ "archive": archive_filename }))
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = steps {
            return Ok(self.failed_result(&instance.id, &source_node_id, &target_node_id, &err));
        }

        let downtime_start = Utc::now();

        let stop_and_import: Result<(), DomainError> = async {
            self.channel_registry.send_command(&source_node_id, "bot.stop", json!({ "bot_id": channel_name })).await?;

            let profile = self.fleet_repo.get_bot_profile(&instance.id).await.unwrap_or(None);
            let import_payload = json!({
                "bot_id": channel_name,
                "image": BotProfile::image_or_fallback(profile.as_ref()),
                "env": BotProfile::env_or_fallback(profile.as_ref()),
                "archive": archive_filename,
            });
            self.channel_registry.send_command(&target_node_id, "bot.import", import_payload).await?;
            self.channel_registry
                .send_command(&target_node_id, "bot.inspect", json!({ "bot_id": channel_name }))
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = stop_and_import {
            return Ok(self.failed_result(&instance.id, &source_node_id, &target_node_id, &err));
        }

        let downtime_ms = (Utc::now() - downtime_start).num_milliseconds();

        self.node_registry.add_node_capacity(&target_node_id, DEFAULT_REQUIRED_MB).await?;
        self.node_registry.add_node_capacity(&source_node_id, -DEFAULT_REQUIRED_MB).await?;

        let mut updated = instance.clone();
        updated.node_id = Some(target_node_id.clone());
        self.fleet_repo.upsert_bot_instance(&updated).await?;

        if let Err(err) = self.routing.reassign_tenant(&channel_name, &_target_host, 0).await {
            warn!(bot_id = %instance.id, error = %err, "🔀 [ROUTING_REASSIGN_FAILED]: migration data moved, routing lagging");
        }

        info!(bot_id = %instance.id, source_node_id, target_node_id, downtime_ms, "📦 [MIGRATION_SUCCEEDED]");

        Ok(MigrationResult {
            success: true,
            bot_id: instance.id.clone(),
            source_node_id,
            target_node_id,
            downtime_ms,
            error: None,
        })
    }

    fn failed_result(&self, bot_id: &str, source_node_id: &str, target_node_id: &str, err: &DomainError) -> MigrationResult {
        warn!(bot_id, source_node_id, target_node_id, error = %err, "📦 [MIGRATION_FAILED]");
        MigrationResult {
            success: false,
            bot_id: bot_id.to_string(),
            source_node_id: source_node_id.to_string(),
            target_node_id: target_node_id.to_string(),
            downtime_ms: 0,
            error: Some(err.to_string()),
        }
    }

    /// Drena un nodo: lo marca `draining`, migra cada tenant que aloja y,
    /// sólo si todos tienen éxito, lo marca `offline`.
    #[instrument(skip(self))]
    pub async fn drain_node(&self, node_id: &str) -> Result<(), DomainError> {
        self.node_registry.set_status(node_id, NodeStatus::Draining).await?;

        let instances = self.fleet_repo.instances_on_node(node_id).await?;
        let mut migrated = 0usize;
        let mut failed = 0usize;

        for instance in &instances {
            if instance.billing_state != BillingState::Active {
                continue;
            }
            match self.migrate_tenant(instance, None).await {
                Ok(result) if result.success => migrated += 1,
                _ => failed += 1,
            }
        }

        if failed == 0 {
            self.node_registry.set_status(node_id, NodeStatus::Offline).await?;
            info!(node_id, migrated, "🚪 [NODE_DRAINED]: all tenants migrated, node offline");
        } else {
            warn!(node_id, migrated, failed, "🚪 [NODE_DRAIN_INCOMPLETE]: leaving node draining");
            self.notify_admin(
                "capacity_overflow",
                json!({ "node_id": node_id, "migrated": migrated, "failed": failed }),
            )
            .await;
        }

        Ok(())
    }
}
