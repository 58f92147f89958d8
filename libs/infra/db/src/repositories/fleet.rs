// [libs/infra/db/src/repositories/fleet.rs]
/*!
 * Respaldo persistente del Node Registry y de los perfiles/instancias de
 * bots. El estado activo del registro vive en memoria en el binario de
 * aplicación; este repositorio es la fuente de verdad para arranque en
 * frío y para la reconstrucción tras un reinicio del proceso.
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_models::{BillingState, BotInstance, BotProfile, Node, NodeStatus, ReleaseChannel, RestartPolicy, UpdatePolicy};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct FleetRepository {
    client: Arc<DbClient>,
}

fn node_status_to_text(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Active => "active",
        NodeStatus::Draining => "draining",
        NodeStatus::Offline => "offline",
        NodeStatus::Unhealthy => "unhealthy",
        NodeStatus::Recovering => "recovering",
    }
}

fn text_to_node_status(raw: &str) -> Result<NodeStatus, DbError> {
    match raw {
        "active" => Ok(NodeStatus::Active),
        "draining" => Ok(NodeStatus::Draining),
        "offline" => Ok(NodeStatus::Offline),
        "unhealthy" => Ok(NodeStatus::Unhealthy),
        "recovering" => Ok(NodeStatus::Recovering),
        other => Err(DbError::MappingError(format!("unknown node status {other}"))),
    }
}

fn billing_state_to_text(state: BillingState) -> &'static str {
    match state {
        BillingState::Active => "active",
        BillingState::Suspended => "suspended",
        BillingState::ScheduledDestroy => "scheduled_destroy",
    }
}

fn text_to_billing_state(raw: &str) -> Result<BillingState, DbError> {
    match raw {
        "active" => Ok(BillingState::Active),
        "suspended" => Ok(BillingState::Suspended),
        "scheduled_destroy" => Ok(BillingState::ScheduledDestroy),
        other => Err(DbError::MappingError(format!("unknown billing state {other}"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn row_to_node(row: &libsql::Row) -> Result<Node, DbError> {
    let status_raw: String = row.get(2)?;
    let last_heartbeat_raw: String = row.get(5)?;
    let registered_raw: String = row.get(6)?;
    Ok(Node {
        id: row.get(0)?,
        host: row.get(1)?,
        status: text_to_node_status(&status_raw)?,
        capacity_mb: row.get(3)?,
        used_mb: row.get(4)?,
        last_heartbeat_at: parse_timestamp(&last_heartbeat_raw)?,
        registered_at: parse_timestamp(&registered_raw)?,
    })
}

impl FleetRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn upsert_node(&self, node: &Node) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO nodes (id, host, status, capacity_mb, used_mb, last_heartbeat_at, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    host = excluded.host,
                    status = excluded.status,
                    capacity_mb = excluded.capacity_mb,
                    used_mb = excluded.used_mb,
                    last_heartbeat_at = excluded.last_heartbeat_at",
                params![
                    node.id.clone(),
                    node.host.clone(),
                    node_status_to_text(node.status),
                    node.capacity_mb,
                    node.used_mb,
                    node.last_heartbeat_at.to_rfc3339(),
                    node.registered_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn record_heartbeat(&self, node_id: &str, used_mb: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE nodes SET used_mb = ?2, last_heartbeat_at = ?3 WHERE id = ?1",
                params![node_id, used_mb, now.to_rfc3339()],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "UPDATE nodes SET status = ?2 WHERE id = ?1",
                params![node_id, node_status_to_text(status)],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, last_heartbeat_at, registered_at FROM nodes",
                (),
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            nodes.push(row_to_node(&row).map_err(DomainError::from)?);
        }
        Ok(nodes)
    }

    pub async fn nodes_with_heartbeat_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Node>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, host, status, capacity_mb, used_mb, last_heartbeat_at, registered_at
                 FROM nodes WHERE status = 'active' AND last_heartbeat_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            nodes.push(row_to_node(&row).map_err(DomainError::from)?);
        }
        Ok(nodes)
    }

    pub async fn upsert_bot_instance(&self, instance: &BotInstance) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO bot_instances (id, tenant_id, name, node_id, billing_state, destroy_after, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    node_id = excluded.node_id,
                    billing_state = excluded.billing_state,
                    destroy_after = excluded.destroy_after",
                params![
                    instance.id.clone(),
                    instance.tenant_id.clone(),
                    instance.name.clone(),
                    instance.node_id.clone(),
                    billing_state_to_text(instance.billing_state),
                    instance.destroy_after.map(|t| t.to_rfc3339()),
                    instance.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn instances_on_node(&self, node_id: &str) -> Result<Vec<BotInstance>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, tenant_id, name, node_id, billing_state, destroy_after, created_at
                 FROM bot_instances WHERE node_id = ?1",
                params![node_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut instances = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let billing_state_raw: String = row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let destroy_after_raw: Option<String> = row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let created_at_raw: String = row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            instances.push(BotInstance {
                id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenant_id: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                name: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                node_id: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                billing_state: text_to_billing_state(&billing_state_raw).map_err(DomainError::from)?,
                destroy_after: destroy_after_raw.map(|raw| parse_timestamp(&raw)).transpose().map_err(DomainError::from)?,
                created_at: parse_timestamp(&created_at_raw).map_err(DomainError::from)?,
            });
        }
        Ok(instances)
    }

    pub async fn get_bot_profile(&self, bot_id: &str) -> Result<Option<BotProfile>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT bot_id, image, env, restart_policy, update_policy, release_channel
                 FROM bot_profiles WHERE bot_id = ?1",
                params![bot_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        else {
            return Ok(None);
        };

        let env_raw: String = row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        let restart_raw: String = row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        let update_raw: String = row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        let release_raw: String = row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        Ok(Some(BotProfile {
            bot_id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            image: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            env: serde_json::from_str(&env_raw).map_err(|e| DomainError::from(DbError::MappingError(e.to_string())))?,
            restart_policy: match restart_raw.as_str() {
                "always" => RestartPolicy::Always,
                "never" => RestartPolicy::Never,
                _ => RestartPolicy::OnFailure,
            },
            update_policy: match update_raw.as_str() {
                "auto" => UpdatePolicy::Auto,
                _ => UpdatePolicy::Manual,
            },
            release_channel: match release_raw.as_str() {
                "beta" => ReleaseChannel::Beta,
                "edge" => ReleaseChannel::Edge,
                _ => ReleaseChannel::Stable,
            },
        }))
    }
}
