// [apps/control-plane/src/handlers/channel.rs]
/*!
 * =================================================================
 * APARATO: NODE UPLINK HANDLER (V1.0)
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: PUENTE ENTRE EL SOCKET CRUDO Y EL ESTADO DE FLOTA
 *
 * `botplane_infra_channel` no conoce `NodeRegistry` ni `RecoveryManager`;
 * este módulo es el único que traduce sus eventos decodificados en
 * mutaciones sobre el estado de la aplicación.
 * =================================================================
 */

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use botplane_domain_models::NodeStatus;
use botplane_infra_channel::{handle_node_uplink, NodeChannelEvent};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::state::AppState;

const EVENT_BUFFER_CAPACITY: usize = 32;

#[instrument(skip(websocket_upgrade, state))]
pub async fn handle_node_channel_upgrade(Path(node_id): Path<String>, State(state): State<AppState>, websocket_upgrade: WebSocketUpgrade) -> impl IntoResponse {
    websocket_upgrade.on_upgrade(move |socket| drive_node_channel(socket, node_id, state))
}

async fn drive_node_channel(socket: axum::extract::ws::WebSocket, node_id: String, state: AppState) {
    let (event_sender, mut event_receiver) = mpsc::channel::<NodeChannelEvent>(EVENT_BUFFER_CAPACITY);

    let events_state = state.clone();
    let event_consumer = tokio::spawn(async move {
        while let Some(event) = event_receiver.recv().await {
            if let Err(err) = apply_node_channel_event(&events_state, event).await {
                warn!(error = %err, "📡 [CHANNEL_EVENT_APPLY_FAILED]");
            }
        }
    });

    handle_node_uplink(socket, node_id, state.channel_registry.clone(), event_sender).await;
    event_consumer.await.ok();
}

async fn apply_node_channel_event(state: &AppState, event: NodeChannelEvent) -> Result<(), botplane_domain_errors::DomainError> {
    match event {
        NodeChannelEvent::Registered { node_id, host, capacity_mb, agent_version } => {
            state.node_registry.register(&node_id, &host, capacity_mb).await?;
            state.recovery_manager.on_node_registered(&node_id).await?;
            tracing::info!(node_id, host, capacity_mb, agent_version = ?agent_version, "🆕 [NODE_REGISTERED]");
        }
        NodeChannelEvent::HeartbeatReceived { node_id, used_mb, timestamp: _ } => {
            state.node_registry.heartbeat(&node_id, used_mb).await?;
        }
        NodeChannelEvent::CommandResultReceived { .. } => {
            // La correlación del resultado ya la resolvió `ChannelRegistry`
            // dentro del socket; aquí no queda nada pendiente de aplicar.
        }
        NodeChannelEvent::Disconnected { node_id: Some(node_id) } => {
            if let Some(node) = state.node_registry.get(&node_id).await {
                if node.status == NodeStatus::Active {
                    state.node_registry.set_status(&node_id, NodeStatus::Unhealthy).await?;
                }
            }
        }
        NodeChannelEvent::Disconnected { node_id: None } => {}
    }
    Ok(())
}
