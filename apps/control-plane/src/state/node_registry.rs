// [apps/control-plane/src/state/node_registry.rs]
/*!
 * =================================================================
 * APARATO: NODE REGISTRY (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: ESTADO EN MEMORIA (ESTRATO L1-APP)
 * RESPONSABILIDAD: VISTA CALIENTE DE LA FLOTA, ESPEJADA A LIBSQL
 *
 * El registro es la capa de contabilidad de confianza para `used_mb`:
 * sus llamadores (Placement, Migración, Recuperación) son responsables
 * de mantenerlo alineado con la realidad. Cada mutación se persiste de
 * inmediato vía `FleetRepository` para que un reinicio del proceso
 * reconstruya el mismo estado desde almacenamiento.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_fleet::is_valid_status_transition;
use botplane_domain_models::{Node, NodeStatus};
use botplane_infra_db::FleetRepository;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct NodeRegistry {
    fleet: Arc<FleetRepository>,
    nodes: Arc<RwLock<HashMap<String, Node>>>,
}

impl NodeRegistry {
    pub fn new(fleet: Arc<FleetRepository>) -> Self {
        Self {
            fleet,
            nodes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reconstruye la vista en memoria desde libSQL al arrancar el proceso.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<(), DomainError> {
        let persisted = self.fleet.list_nodes().await?;
        let mut nodes = self.nodes.write().await;
        for node in persisted {
            nodes.insert(node.id.clone(), node);
        }
        info!(count = nodes.len(), "🗺️ [FLEET_HYDRATED]: node registry loaded from storage");
        Ok(())
    }

    /// Da de alta un nodo nuevo o reemplaza sus datos de anuncio si ya
    /// existía (reconexión tras reinicio del agente).
    #[instrument(skip(self, host))]
    pub async fn register(&self, node_id: &str, host: &str, capacity_mb: i64) -> Result<Node, DomainError> {
        let now = Utc::now();
        let node = {
            let mut nodes = self.nodes.write().await;
            let node = nodes
                .entry(node_id.to_string())
                .and_modify(|existing| {
                    existing.host = host.to_string();
                    existing.capacity_mb = capacity_mb;
                    existing.last_heartbeat_at = now;
                })
                .or_insert_with(|| Node {
                    id: node_id.to_string(),
                    host: host.to_string(),
                    status: NodeStatus::Active,
                    capacity_mb,
                    used_mb: 0,
                    last_heartbeat_at: now,
                    registered_at: now,
                });
            node.clone()
        };
        self.fleet.upsert_node(&node).await?;
        info!(node_id, capacity_mb, "🖥️ [NODE_REGISTERED]: worker joined the fleet");
        Ok(node)
    }

    /// Acepta un latido sólo si el nodo ya se registró; un latido de un
    /// nodo desconocido se descarta.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, node_id: &str, used_mb: i64) -> Result<bool, DomainError> {
        let now = Utc::now();
        let known = {
            let mut nodes = self.nodes.write().await;
            match nodes.get_mut(node_id) {
                Some(node) => {
                    node.used_mb = used_mb;
                    node.last_heartbeat_at = now;
                    true
                }
                None => false,
            }
        };
        if !known {
            warn!(node_id, "⚠️ [HEARTBEAT_UNKNOWN]: rejecting heartbeat from unregistered node");
            return Ok(false);
        }
        self.fleet.record_heartbeat(node_id, used_mb, now).await?;
        Ok(true)
    }

    /// Transiciona el estado de un nodo, validando contra la matriz de
    /// ciclo de vida antes de mutar memoria y almacenamiento.
    #[instrument(skip(self))]
    pub async fn set_status(&self, node_id: &str, to: NodeStatus) -> Result<(), DomainError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| DomainError::NotFound(format!("node {node_id}")))?;

        if !is_valid_status_transition(node.status, to) {
            return Err(DomainError::Fatal(format!(
                "invalid node status transition {:?} -> {:?} for {node_id}",
                node.status, to
            )));
        }
        node.status = to;
        drop(nodes);
        self.fleet.set_status(node_id, to).await
    }

    /// Ajusta `used_mb` por `delta` (positivo al colocar, negativo al
    /// liberar); el llamador garantiza que el delta refleja la realidad.
    #[instrument(skip(self))]
    pub async fn add_node_capacity(&self, node_id: &str, delta: i64) -> Result<(), DomainError> {
        let node = {
            let mut nodes = self.nodes.write().await;
            let node = nodes
                .get_mut(node_id)
                .ok_or_else(|| DomainError::NotFound(format!("node {node_id}")))?;
            node.used_mb += delta;
            node.clone()
        };
        self.fleet.upsert_node(&node).await
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn list_all(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Nodos `active` cuyo último latido expiró, transicionados a
    /// `unhealthy` in situ; el llamador dispara la recuperación para cada
    /// uno devuelto.
    #[instrument(skip(self))]
    pub async fn sweep_unhealthy(&self, timeout: chrono::Duration) -> Vec<Node> {
        let cutoff = Utc::now() - timeout;
        let stale_ids: Vec<String> = {
            let nodes = self.nodes.read().await;
            nodes
                .values()
                .filter(|node| node.status == NodeStatus::Active && node.last_heartbeat_at < cutoff)
                .map(|node| node.id.clone())
                .collect()
        };

        let mut newly_unhealthy = Vec::new();
        for node_id in stale_ids {
            if self.set_status(&node_id, NodeStatus::Unhealthy).await.is_ok() {
                warn!(node_id = %node_id, "💔 [NODE_UNHEALTHY]: heartbeat timeout exceeded");
                if let Some(node) = self.get(&node_id).await {
                    newly_unhealthy.push(node);
                }
            }
        }
        newly_unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botplane_infra_db::DbClient;

    async fn registry() -> NodeRegistry {
        let client = Arc::new(DbClient::connect(":memory:", None).await.unwrap());
        NodeRegistry::new(Arc::new(FleetRepository::new(client)))
    }

    #[tokio::test]
    async fn heartbeat_from_unknown_node_is_rejected() {
        let registry = registry().await;
        assert!(!registry.heartbeat("ghost-node", 100).await.unwrap());
    }

    #[tokio::test]
    async fn register_then_heartbeat_updates_used_mb() {
        let registry = registry().await;
        registry.register("node-1", "10.0.0.1", 4096).await.unwrap();
        assert!(registry.heartbeat("node-1", 1500).await.unwrap());
        let node = registry.get("node-1").await.unwrap();
        assert_eq!(node.used_mb, 1500);
    }

    #[tokio::test]
    async fn invalid_status_transition_is_rejected() {
        let registry = registry().await;
        registry.register("node-1", "10.0.0.1", 4096).await.unwrap();
        let err = registry.set_status("node-1", NodeStatus::Offline).await.unwrap_err();
        assert!(matches!(err, DomainError::Fatal(_)));
    }
}
