// [apps/control-plane/src/services/meter_flush.rs]
/*!
 * =================================================================
 * APARATO: METER FLUSHER (V1.0)
 * CLASIFICACIÓN: SERVICIO DE FONDO (ESTRATO L1-APP)
 * RESPONSABILIDAD: VACIAR EL BUFFER DEL EMISOR HACIA LIBSQL
 *
 * El WAL sólo se trunca (`checkpoint`) después de que cada evento del
 * lote drenado quedó confirmado en libSQL o movido a la cola de
 * muertos; un corte de luz a mitad del vaciado se recupera reproduciendo
 * el WAL intacto en el próximo arranque.
 * =================================================================
 */

use std::sync::Arc;
use std::time::Duration;

use botplane_domain_metering::MeterEvent;
use botplane_infra_db::MeteringRepository;
use botplane_infra_metering::MeterEmitter;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};

const MAX_INSERT_ATTEMPTS: u32 = 3;

pub struct MeterFlusher {
    emitter: Arc<MeterEmitter>,
    repo: Arc<MeteringRepository>,
    flush_interval: Duration,
}

impl MeterFlusher {
    pub fn new(emitter: Arc<MeterEmitter>, repo: Arc<MeteringRepository>, flush_interval: Duration) -> Self {
        Self {
            emitter,
            repo,
            flush_interval,
        }
    }

    /// Reproduce el WAL heredado de una ejecución anterior y lo reinyecta
    /// al buffer en memoria; se invoca una sola vez al arrancar, antes
    /// de que el bucle periódico comience a drenar.
    #[instrument(skip(self))]
    pub async fn recover_from_wal(&self) -> anyhow::Result<usize> {
        let replayed = self.emitter.replay_wal().await.map_err(|e| anyhow::anyhow!(e))?;
        let count = replayed.len();
        for event in replayed {
            self.emitter.emit(event).await.map_err(|e| anyhow::anyhow!(e))?;
        }
        if count > 0 {
            info!(count, "📼 [METER_WAL_RECOVERED]: replayed events queued for flush");
        }
        Ok(count)
    }

    async fn insert_with_retry(&self, event: &MeterEvent) -> bool {
        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            match self.repo.insert_event_if_absent(event).await {
                Ok(_) => return true,
                Err(err) => {
                    warn!(event_id = %event.id, attempt, error = %err, "📊 [METER_INSERT_RETRY]: durable insert failed");
                }
            }
        }
        if let Err(err) = self.emitter.write_to_dead_letter(event, "exceeded insert retry budget").await {
            warn!(event_id = %event.id, error = %err, "📊 [METER_DLQ_WRITE_FAILED]");
        }
        false
    }

    /// Drena el buffer, inserta cada evento de forma idempotente y, sólo
    /// tras agotar el lote completo, trunca el WAL.
    #[instrument(skip(self))]
    pub async fn flush_once(&self) -> usize {
        let events = self.emitter.drain().await;
        if events.is_empty() {
            return 0;
        }

        let mut flushed = 0usize;
        for event in &events {
            if self.insert_with_retry(event).await {
                flushed += 1;
            }
        }

        if let Err(err) = self.emitter.checkpoint().await {
            warn!(error = %err, "📊 [METER_CHECKPOINT_FAILED]: WAL left untrimmed, next replay will resend this batch");
        }

        info!(total = events.len(), flushed, "📊 [METER_FLUSHED]");
        flushed
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.flush_once().await;
                        break;
                    }
                }
            }
        }
        info!("📊 [METER_FLUSHER_STOPPED]");
    }
}
