// [libs/infra/channel/src/protocol.rs]
/*!
 * Forma de las tramas que viajan por el canal de comando. `ClientFrame`
 * llega de un nodo; `ServerCommand` se empuja hacia un nodo; `NodeChannelEvent`
 * es lo que el socket reenvía al llamador tras decodificar un `ClientFrame`.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        node_id: String,
        host: String,
        capacity_mb: i64,
        #[serde(default)]
        agent_version: Option<String>,
    },
    Heartbeat {
        node_id: String,
        used_mb: i64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    CommandResult {
        command_id: String,
        ok: bool,
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerCommand {
    Command {
        command_id: String,
        command_type: String,
        payload: Value,
    },
}

/// Evento decodificado que el socket reenvía al llamador por un `mpsc`
/// interno, desacoplando la lectura de red del procesamiento de negocio.
#[derive(Debug, Clone)]
pub enum NodeChannelEvent {
    Registered { node_id: String, host: String, capacity_mb: i64, agent_version: Option<String> },
    HeartbeatReceived { node_id: String, used_mb: i64, timestamp: Option<i64> },
    CommandResultReceived { command_id: String, ok: bool, payload: Value },
    Disconnected { node_id: Option<String> },
}
