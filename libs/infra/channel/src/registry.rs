// [libs/infra/channel/src/registry.rs]
/*!
 * Registro de conexiones activas y correlación de mandos en vuelo. Una
 * entrada por nodo conectado; un `oneshot` por mando pendiente de
 * respuesta, indexado por `command_id`.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use botplane_domain_errors::DomainError;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::protocol::ServerCommand;

const DEFAULT_COMMAND_BUFFER_CAPACITY: usize = 32;
const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct ChannelRegistry {
    connections: Arc<RwLock<HashMap<String, mpsc::Sender<ServerCommand>>>>,
    pending_commands: Arc<Mutex<HashMap<String, oneshot::Sender<(bool, Value)>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            pending_commands: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register(&self, node_id: &str) -> mpsc::Receiver<ServerCommand> {
        let (sender, receiver) = mpsc::channel(DEFAULT_COMMAND_BUFFER_CAPACITY);
        self.connections.write().await.insert(node_id.to_string(), sender);
        receiver
    }

    pub async fn unregister(&self, node_id: &str) {
        self.connections.write().await.remove(node_id);
    }

    pub async fn list_connected(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn is_connected(&self, node_id: &str) -> bool {
        self.connections.read().await.contains_key(node_id)
    }

    /// Envía un mando a un nodo conectado y espera su resultado
    /// correlacionado, con un tope de tiempo fijo por mando.
    pub async fn send_command(
        &self,
        node_id: &str,
        command_type: &str,
        payload: Value,
    ) -> Result<Value, DomainError> {
        let sender = self
            .connections
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| DomainError::NodeNotConnected(node_id.to_string()))?;

        let command_id = Uuid::new_v4().to_string();
        let (result_sender, result_receiver) = oneshot::channel();
        self.pending_commands
            .lock()
            .await
            .insert(command_id.clone(), result_sender);

        let command = ServerCommand::Command {
            command_id: command_id.clone(),
            command_type: command_type.to_string(),
            payload,
        };

        if sender.send(command).await.is_err() {
            self.pending_commands.lock().await.remove(&command_id);
            return Err(DomainError::NodeNotConnected(node_id.to_string()));
        }

        let outcome = tokio::time::timeout(
            Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECONDS),
            result_receiver,
        )
        .await;

        match outcome {
            Ok(Ok((true, payload))) => Ok(payload),
            Ok(Ok((false, payload))) => Err(DomainError::InvalidUpstream(payload.to_string())),
            Ok(Err(_)) => Err(DomainError::Transient(format!(
                "command {command_id} dropped before a result arrived"
            ))),
            Err(_) => {
                self.pending_commands.lock().await.remove(&command_id);
                warn!(node_id, command_id, "command timed out waiting for a result");
                Err(DomainError::Transient(format!("command {command_id} timed out")))
            }
        }
    }

    /// Completa el `oneshot` correlacionado por `command_id`, invocado
    /// cuando llega una trama `command_result` de un nodo.
    pub async fn resolve_command(&self, command_id: &str, ok: bool, payload: Value) {
        if let Some(sender) = self.pending_commands.lock().await.remove(command_id) {
            let _ = sender.send((ok, payload));
        }
    }
}
