// [libs/infra/db/src/repositories/metering.rs]
/*!
 * Almacenamiento de eventos de medición crudos y de los resúmenes de uso
 * por ventana. La inserción de eventos es idempotente por `id` (el WAL
 * del emisor puede reproducir el mismo evento tras un reinicio); la
 * inserción de resúmenes es idempotente por la clave única
 * (tenant_id, capability, provider, window_start).
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_metering::{MeterEvent, UsageSummary};
use libsql::params;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct MeteringRepository {
    client: Arc<DbClient>,
}

impl MeteringRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    /// Inserta el evento si su `id` no existe ya. Devuelve `true` si se
    /// insertó, `false` si ya estaba presente (reproducción de WAL).
    pub async fn insert_event_if_absent(&self, event: &MeterEvent) -> Result<bool, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let metadata_json =
            serde_json::to_string(&event.metadata).map_err(|e| DomainError::from(DbError::MappingError(e.to_string())))?;

        let changed = connection
            .execute(
                "INSERT OR IGNORE INTO meter_events
                    (id, tenant_id, capability, provider, cost, charge, timestamp_ms,
                     session_id, duration_ms, usage_units, usage_unit_type, tier, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    event.id.to_string(),
                    event.tenant_id.clone(),
                    event.capability.clone(),
                    event.provider.clone(),
                    event.cost,
                    event.charge,
                    event.timestamp_ms,
                    event.session_id.clone(),
                    event.duration_ms,
                    event.usage_units,
                    event.usage_unit_type.clone(),
                    event.tier.clone(),
                    metadata_json,
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(changed > 0)
    }

    pub async fn events_in_window(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<MeterEvent>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, tenant_id, capability, provider, cost, charge, timestamp_ms,
                        session_id, duration_ms, usage_units, usage_unit_type, tier, metadata
                 FROM meter_events
                 WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2",
                params![window_start, window_end],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let id_raw: String = row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let metadata_raw: String = row.get(12).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            events.push(MeterEvent {
                id: Uuid::parse_str(&id_raw).map_err(|e| DomainError::from(DbError::MappingError(e.to_string())))?,
                tenant_id: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                capability: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                provider: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                cost: row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                charge: row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                timestamp_ms: row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                session_id: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                duration_ms: row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                usage_units: row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                usage_unit_type: row.get(10).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tier: row.get(11).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                metadata: serde_json::from_str(&metadata_raw)
                    .map_err(|e| DomainError::from(DbError::MappingError(e.to_string())))?,
            });
        }
        Ok(events)
    }

    /// Inserta los resúmenes de una ventana. Un reintento tras un cierre
    /// abrupto del agregador vuelve a calcular la misma ventana y choca
    /// con el índice único, que se ignora con `INSERT OR IGNORE`.
    pub async fn insert_summaries_if_absent(&self, summaries: &[UsageSummary]) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        for summary in summaries {
            connection
                .execute(
                    "INSERT OR IGNORE INTO usage_summaries
                        (id, window_start, window_end, tenant_id, capability, provider,
                         event_count, total_cost, total_charge, total_duration_ms, total_usage_units)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        Uuid::new_v4().to_string(),
                        summary.window_start,
                        summary.window_end,
                        summary.tenant_id.clone(),
                        summary.capability.clone(),
                        summary.provider.clone(),
                        summary.event_count,
                        summary.total_cost,
                        summary.total_charge,
                        summary.total_duration_ms,
                        summary.total_usage_units,
                    ],
                )
                .await
                .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        }
        Ok(())
    }

    /// La última ventana cerrada ya registrada, usada como marca de agua
    /// alta para reanudar la agregación tras un reinicio.
    pub async fn high_water_mark(&self) -> Result<Option<i64>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query("SELECT MAX(window_start) FROM usage_summaries", ())
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        match rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            Some(row) => row
                .get::<Option<i64>>(0)
                .map_err(|e| DomainError::from(DbError::QueryError(e))),
            None => Ok(None),
        }
    }

    /// El timestamp del evento crudo más antiguo jamás insertado, usado
    /// por el agregador para fijar su punto de partida cuando todavía no
    /// existe ningún resumen (en vez de arrancar en la época Unix).
    pub async fn earliest_event_timestamp(&self) -> Result<Option<i64>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query("SELECT MIN(timestamp_ms) FROM meter_events", ())
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        match rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            Some(row) => row
                .get::<Option<i64>>(0)
                .map_err(|e| DomainError::from(DbError::QueryError(e))),
            None => Ok(None),
        }
    }
}
