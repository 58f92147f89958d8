// [libs/domain/models/src/fleet.rs]
/*!
 * Entidades de flota: el Nodo como aparato físico de cómputo, y la
 * vinculación de un tenant (BotInstance + BotProfile) a ese nodo.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Estado de vida de un nodo, gobernado en exclusiva por el Node Registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Draining,
    Offline,
    Unhealthy,
    Recovering,
}

/// Host de cómputo que anuncia capacidad y aloja contenedores de tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub host: String,
    pub status: NodeStatus,
    pub capacity_mb: i64,
    pub used_mb: i64,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Node {
    /// Capacidad libre exacta, nunca negativa en un nodo sano.
    pub fn available_mb(&self) -> i64 {
        self.capacity_mb - self.used_mb
    }

    pub fn is_placement_eligible(&self, required_mb: i64) -> bool {
        self.status == NodeStatus::Active && self.available_mb() >= required_mb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Active,
    Suspended,
    ScheduledDestroy,
}

/// Vinculación de un tenant a un nodo (puede estar sin asignar mientras espera plaza).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInstance {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub node_id: Option<String>,
    pub billing_state: BillingState,
    pub destroy_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BotInstance {
    /// Nombre canónico usado en los payloads del canal de comando.
    pub fn channel_name(&self) -> String {
        format!("tenant_{}", self.tenant_id)
    }

    pub fn archive_filename(&self) -> String {
        format!("tenant_{}.tar.gz", self.tenant_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseChannel {
    Stable,
    Beta,
    Edge,
}

/// Configuración deseada de una instancia: imagen, entorno y políticas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotProfile {
    pub bot_id: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub update_policy: UpdatePolicy,
    pub release_channel: ReleaseChannel,
}

/// Imagen de respaldo usada cuando el perfil se perdió o no se pudo leer.
pub const DEFAULT_RECOVERY_IMAGE: &str = "botplane/bot-runtime:stable";

impl BotProfile {
    /// Reconstruye un entorno utilizable a partir de un perfil potencialmente
    /// ausente o con JSON corrupto, conforme a la regla de caída segura.
    pub fn env_or_fallback(profile: Option<&BotProfile>) -> HashMap<String, String> {
        profile.map(|p| p.env.clone()).unwrap_or_default()
    }

    pub fn image_or_fallback(profile: Option<&BotProfile>) -> String {
        profile
            .map(|p| p.image.clone())
            .unwrap_or_else(|| DEFAULT_RECOVERY_IMAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_mb_reflects_used_capacity() {
        let node = Node {
            id: "node-1".into(),
            host: "10.0.0.1".into(),
            status: NodeStatus::Active,
            capacity_mb: 4096,
            used_mb: 1500,
            last_heartbeat_at: Utc::now(),
            registered_at: Utc::now(),
        };
        assert_eq!(node.available_mb(), 2596);
        assert!(node.is_placement_eligible(2000));
        assert!(!node.is_placement_eligible(3000));
    }

    #[test]
    fn draining_node_is_never_placement_eligible() {
        let node = Node {
            id: "node-1".into(),
            host: "10.0.0.1".into(),
            status: NodeStatus::Draining,
            capacity_mb: 4096,
            used_mb: 0,
            last_heartbeat_at: Utc::now(),
            registered_at: Utc::now(),
        };
        assert!(!node.is_placement_eligible(1));
    }

    #[test]
    fn profile_fallback_uses_default_image_and_empty_env_when_missing() {
        assert_eq!(BotProfile::image_or_fallback(None), DEFAULT_RECOVERY_IMAGE);
        assert!(BotProfile::env_or_fallback(None).is_empty());
    }
}
