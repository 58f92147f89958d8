// [libs/infra/channel/src/socket.rs]
/*!
 * Orquestador de la sesión WebSocket de un nodo: arquitectura de Triple
 * Tarea (downstream, upstream, trabajador interno) con limpieza atómica
 * — el primer brazo que termina aborta a los otros dos.
 *
 * El `node_id` se conoce desde la apertura del socket (va en la ruta de
 * conexión), así que el registro ocurre antes de leer la primera trama y
 * un mando puede encolarse para el nodo desde el instante de la conexión.
 */

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::to_string as json_to_string;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::protocol::{ClientFrame, NodeChannelEvent};
use crate::registry::ChannelRegistry;

const KEEPALIVE_INTERVAL_SECONDS: u64 = 25;
const EVENT_BUFFER_CAPACITY: usize = 32;

/// Conduce una sesión de socket ya actualizada hasta su cierre. El
/// `event_sink` recibe cada trama decodificada para que el llamador mute
/// el Node Registry en memoria y la persistencia sin que este crate
/// conozca esos tipos.
#[instrument(skip(socket, registry, event_sink))]
pub async fn handle_node_uplink(
    socket: WebSocket,
    node_id: String,
    registry: ChannelRegistry,
    event_sink: mpsc::Sender<NodeChannelEvent>,
) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let mut command_receiver = registry.register(&node_id).await;
    info!(node_id = %node_id, "⚡ [UPLINK_OPEN]: node session established");

    let (frame_sender, mut frame_receiver) = mpsc::channel::<ClientFrame>(EVENT_BUFFER_CAPACITY);

    let event_sink_for_worker = event_sink.clone();
    let registry_for_worker = registry.clone();
    let mut worker_task = tokio::spawn(async move {
        while let Some(frame) = frame_receiver.recv().await {
            match frame {
                ClientFrame::Register { node_id, host, capacity_mb, agent_version } => {
                    let _ = event_sink_for_worker
                        .send(NodeChannelEvent::Registered { node_id, host, capacity_mb, agent_version })
                        .await;
                }
                ClientFrame::Heartbeat { node_id, used_mb, timestamp } => {
                    let _ = event_sink_for_worker
                        .send(NodeChannelEvent::HeartbeatReceived { node_id, used_mb, timestamp })
                        .await;
                }
                ClientFrame::CommandResult { command_id, ok, payload } => {
                    registry_for_worker.resolve_command(&command_id, ok, payload.clone()).await;
                    let _ = event_sink_for_worker
                        .send(NodeChannelEvent::CommandResultReceived { command_id, ok, payload })
                        .await;
                }
            }
        }
    });

    let node_id_for_sender = node_id.clone();
    let mut sender_task = tokio::spawn(async move {
        let mut keepalive_timer = interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECONDS));
        loop {
            tokio::select! {
                _ = keepalive_timer.tick() => {
                    if socket_sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                command = command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            let Ok(serialized) = json_to_string(&command) else { continue };
                            if socket_sender.send(Message::Text(serialized)).await.is_err() {
                                warn!(node_id = %node_id_for_sender, "⚠️ [UPLINK_SEVERED]: lost downstream strata");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let node_id_for_receiver = node_id.clone();
    let mut receiver_task = tokio::spawn(async move {
        while let Some(message) = socket_receiver.next().await {
            match message {
                Ok(Message::Text(raw)) => match serde_json::from_str::<ClientFrame>(&raw) {
                    Ok(frame) => {
                        if frame_sender.send(frame).await.is_err() {
                            error!(node_id = %node_id_for_receiver, "❌ internal frame queue collapsed");
                            break;
                        }
                    }
                    Err(e) => warn!(node_id = %node_id_for_receiver, error = %e, "discarding malformed client frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!(node_id = %node_id_for_receiver, "🔌 node closed the uplink");
                    break;
                }
                Err(e) => {
                    error!(node_id = %node_id_for_receiver, error = %e, "network fault on node uplink");
                    break;
                }
                _ => {}
            }
        }
    });

    // El primer centinela que concluye dispara la limpieza de los otros dos.
    tokio::select! {
        _ = &mut sender_task => {
            receiver_task.abort();
            worker_task.abort();
        }
        _ = &mut receiver_task => {
            sender_task.abort();
            worker_task.abort();
        }
        _ = &mut worker_task => {
            sender_task.abort();
            receiver_task.abort();
        }
    };

    registry.unregister(&node_id).await;
    let _ = event_sink.send(NodeChannelEvent::Disconnected { node_id: Some(node_id.clone()) }).await;
    info!(node_id = %node_id, "💀 [UPLINK_TERMINATED]: node session resources released");
}
