// [apps/control-plane/src/services/meter_aggregate.rs]
/*!
 * =================================================================
 * APARATO: METER AGGREGATOR (V1.0)
 * CLASIFICACIÓN: SERVICIO DE FONDO (ESTRATO L1-APP)
 * RESPONSABILIDAD: CERRAR VENTANAS PASADAS EN RESÚMENES DE USO
 *
 * La marca de agua alta vive en `usage_summaries` (el máximo
 * `window_start` ya escrito), así que el agregador no necesita su
 * propio estado persistente: tras un reinicio, `high_water_mark`
 * reconstruye exactamente por dónde iba.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_metering::{pending_past_windows, summarize_window, window_start_for};
use botplane_infra_db::MeteringRepository;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};

pub struct MeterAggregator {
    repo: Arc<MeteringRepository>,
    window_ms: i64,
    poll_interval: std::time::Duration,
}

impl MeterAggregator {
    pub fn new(repo: Arc<MeteringRepository>, window_ms: i64, poll_interval: std::time::Duration) -> Self {
        Self {
            repo,
            window_ms,
            poll_interval,
        }
    }

    /// Cierra toda ventana estrictamente pasada que aún no tenga
    /// resúmenes, desde la marca de agua alta hasta ahora. Sin resúmenes
    /// previos, arranca en el evento más antiguo conocido en vez de la
    /// época Unix, para no barrer décadas de ventanas centinela vacías.
    #[instrument(skip(self))]
    pub async fn aggregate_pending(&self) -> anyhow::Result<usize> {
        let next_window_start = match self.repo.high_water_mark().await.map_err(|e| anyhow::anyhow!(e))? {
            Some(last_window_start) => last_window_start + self.window_ms,
            None => match self.repo.earliest_event_timestamp().await.map_err(|e| anyhow::anyhow!(e))? {
                Some(earliest) => window_start_for(earliest, self.window_ms),
                None => return Ok(0),
            },
        };
        let now_ms = Utc::now().timestamp_millis();
        let windows = pending_past_windows(next_window_start, now_ms, self.window_ms);

        let mut closed = 0usize;
        for window_start in windows {
            let window_end = window_start + self.window_ms;
            let events = self
                .repo
                .events_in_window(window_start, window_end)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let summaries = summarize_window(&events, window_start, self.window_ms);
            self.repo.insert_summaries_if_absent(&summaries).await.map_err(|e| anyhow::anyhow!(e))?;
            closed += 1;
        }

        if closed > 0 {
            info!(closed, "🪟 [METER_WINDOWS_CLOSED]: usage summaries written");
        }
        Ok(closed)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.aggregate_pending().await {
                        warn!(error = %err, "🪟 [METER_AGGREGATE_FAILED]");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🪟 [METER_AGGREGATOR_STOPPED]");
    }
}
