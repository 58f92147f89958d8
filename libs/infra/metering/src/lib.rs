// [libs/infra/metering/src/lib.rs]
/*!
 * =================================================================
 * APARATO: METER EMITTER (V1.0 - WRITE-AHEAD DURABILITY)
 * CLASIFICACIÓN: INFRAESTRUCTURA DE MEDICIÓN (ESTRATO L3)
 * RESPONSABILIDAD: DURABILIDAD DE EVENTOS ANTES DE SU LLEGADA A LIBSQL
 *
 * Cada evento se añade primero a un WAL de línea-por-evento (JSON) con
 * fsync antes de entrar al buffer en memoria. Si el proceso muere entre
 * el fsync y el vaciado hacia el repositorio, `replay_wal` reconstruye
 * los eventos pendientes al arrancar; la inserción en libSQL es
 * idempotente por `id`, así que una reproducción repetida no duplica.
 * =================================================================
 */

use std::path::PathBuf;

use botplane_domain_errors::DomainError;
use botplane_domain_metering::MeterEvent;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct MeterEmitter {
    wal_path: PathBuf,
    dead_letter_path: PathBuf,
    wal_file: Mutex<File>,
    buffer: Mutex<Vec<MeterEvent>>,
}

impl MeterEmitter {
    pub async fn open(wal_path: impl Into<PathBuf>, dead_letter_path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let wal_path = wal_path.into();
        let dead_letter_path = dead_letter_path.into();

        let wal_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .await
            .map_err(|e| DomainError::Fatal(format!("cannot open metering WAL at {wal_path:?}: {e}")))?;

        Ok(Self {
            wal_path,
            dead_letter_path,
            wal_file: Mutex::new(wal_file),
            buffer: Mutex::new(Vec::new()),
        })
    }

    /// Añade el evento al WAL con `fsync` antes de aceptarlo en el
    /// buffer en memoria. Un evento nunca entra al buffer sin haber
    /// tocado disco primero.
    pub async fn emit(&self, event: MeterEvent) -> Result<(), DomainError> {
        let line = serde_json::to_string(&event).map_err(|e| DomainError::Fatal(e.to_string()))?;
        {
            let mut file = self.wal_file.lock().await;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| DomainError::Transient(e.to_string()))?;
            file.write_all(b"\n").await.map_err(|e| DomainError::Transient(e.to_string()))?;
            file.sync_data().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        }
        self.buffer.lock().await.push(event);
        Ok(())
    }

    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Vacía el buffer en memoria y lo devuelve para que el llamador lo
    /// escriba en el repositorio. El WAL conserva su contenido hasta
    /// `checkpoint`, así que un fallo entre aquí y la escritura en
    /// libSQL se recupera en el próximo `replay_wal`.
    pub async fn drain(&self) -> Vec<MeterEvent> {
        let mut buffer = self.buffer.lock().await;
        std::mem::take(&mut *buffer)
    }

    /// Trunca el WAL tras confirmar que su contenido ya llegó a libSQL.
    pub async fn checkpoint(&self) -> Result<(), DomainError> {
        let mut file = self.wal_file.lock().await;
        *file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        // Reabrir en modo apéndice para que las escrituras futuras no pisen el truncado.
        *file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Ok(())
    }

    /// Lee todo el WAL y devuelve los eventos decodificables, saltando
    /// líneas corruptas (por ejemplo, una escritura truncada a mitad de
    /// un apagón) en vez de abortar la reproducción completa.
    pub async fn replay_wal(&self) -> Result<Vec<MeterEvent>, DomainError> {
        let file = File::open(&self.wal_path)
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        let mut lines = BufReader::new(file).lines();

        let mut events = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MeterEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping corrupt WAL line during replay"),
            }
        }
        debug!(count = events.len(), "replayed metering WAL");
        Ok(events)
    }

    /// Mueve un evento que agotó sus reintentos de escritura a la cola
    /// de muertos, como un renglón JSON anotado con la causa.
    pub async fn write_to_dead_letter(&self, event: &MeterEvent, reason: &str) -> Result<(), DomainError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.dead_letter_path)
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;

        let record = serde_json::json!({ "event": event, "reason": reason });
        let line = serde_json::to_string(&record).map_err(|e| DomainError::Fatal(e.to_string()))?;
        file.write_all(line.as_bytes()).await.map_err(|e| DomainError::Transient(e.to_string()))?;
        file.write_all(b"\n").await.map_err(|e| DomainError::Transient(e.to_string()))?;
        file.sync_data().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        Ok(())
    }

    /// Vacía y asienta el WAL antes del apagado; no trunca, para que un
    /// apagado abrupto inmediatamente después siga siendo recuperable.
    pub async fn close(&self) -> Result<(), DomainError> {
        let mut file = self.wal_file.lock().await;
        file.flush().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        file.sync_data().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn event(tenant: &str) -> MeterEvent {
        MeterEvent {
            id: Uuid::new_v4(),
            tenant_id: tenant.into(),
            capability: "chat".into(),
            provider: "openai".into(),
            cost: 1,
            charge: 2,
            timestamp_ms: 1_000,
            session_id: None,
            duration_ms: None,
            usage_units: None,
            usage_unit_type: None,
            tier: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn emitted_events_survive_a_fresh_open_via_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("meter.wal");
        let dlq_path = dir.path().join("meter.dlq");

        let emitter = MeterEmitter::open(&wal_path, &dlq_path).await.unwrap();
        emitter.emit(event("tenant-1")).await.unwrap();
        emitter.emit(event("tenant-2")).await.unwrap();
        assert_eq!(emitter.buffered_len().await, 2);

        let reopened = MeterEmitter::open(&wal_path, &dlq_path).await.unwrap();
        let replayed = reopened.replay_wal().await.unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[tokio::test]
    async fn checkpoint_clears_the_wal_for_future_replays() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("meter.wal");
        let dlq_path = dir.path().join("meter.dlq");

        let emitter = MeterEmitter::open(&wal_path, &dlq_path).await.unwrap();
        emitter.emit(event("tenant-1")).await.unwrap();
        emitter.checkpoint().await.unwrap();

        let replayed = emitter.replay_wal().await.unwrap();
        assert!(replayed.is_empty());
    }

    #[tokio::test]
    async fn drain_empties_the_in_memory_buffer_without_touching_the_wal() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("meter.wal");
        let dlq_path = dir.path().join("meter.dlq");

        let emitter = MeterEmitter::open(&wal_path, &dlq_path).await.unwrap();
        emitter.emit(event("tenant-1")).await.unwrap();
        let drained = emitter.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(emitter.buffered_len().await, 0);

        let replayed = emitter.replay_wal().await.unwrap();
        assert_eq!(replayed.len(), 1, "drain must not remove the event from the WAL");
    }
}
