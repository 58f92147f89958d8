// [apps/control-plane/src/services/liveness_sweeper.rs]
/*!
 * =================================================================
 * APARATO: LIVENESS SWEEPER (V1.0)
 * CLASIFICACIÓN: SERVICIO DE FONDO (ESTRATO L1-APP)
 * RESPONSABILIDAD: DETECTAR NODOS MUERTOS Y DISPARAR SU RECUPERACIÓN
 *
 * El barrido marca un nodo `unhealthy` y entrega el control a
 * `RecoveryManager` en el mismo tick; un nodo nunca queda `unhealthy`
 * sin que se haya intentado al menos una vez recuperar a sus tenants.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_models::RecoveryTrigger;
use chrono::Duration as ChronoDuration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument};

use crate::services::recovery::RecoveryManager;
use crate::state::NodeRegistry;

pub struct LivenessSweeper {
    node_registry: NodeRegistry,
    recovery: Arc<RecoveryManager>,
    heartbeat_timeout: ChronoDuration,
    sweep_interval: std::time::Duration,
}

impl LivenessSweeper {
    pub fn new(node_registry: NodeRegistry, recovery: Arc<RecoveryManager>, heartbeat_timeout: std::time::Duration, sweep_interval: std::time::Duration) -> Self {
        Self {
            node_registry,
            recovery,
            heartbeat_timeout: ChronoDuration::from_std(heartbeat_timeout).unwrap_or(ChronoDuration::seconds(90)),
            sweep_interval,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep_once(&self) {
        let newly_unhealthy = self.node_registry.sweep_unhealthy(self.heartbeat_timeout).await;
        for node in newly_unhealthy {
            info!(node_id = %node.id, "🚨 [LIVENESS_SWEEP]: dead node detected, triggering recovery");
            if let Err(err) = self.recovery.trigger_recovery(&node.id, RecoveryTrigger::HeartbeatTimeout).await {
                error!(node_id = %node.id, error = %err, "🚨 [LIVENESS_RECOVERY_DISPATCH_FAILED]");
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🚨 [LIVENESS_SWEEPER_STOPPED]");
    }
}
