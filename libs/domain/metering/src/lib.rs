// [libs/domain/metering/src/lib.rs]
/*!
 * =================================================================
 * APARATO: METERING DOMAIN MODEL (V1.0 - WINDOWED ROLL-UP)
 * CLASIFICACIÓN: DOMINIO DE MEDICIÓN (ESTRATO L2)
 * RESPONSABILIDAD: EVENTOS DE USO Y EL ALGORITMO PURO DE AGREGACIÓN
 *
 * La durabilidad (WAL/DLQ, reintentos, reinserción idempotente) vive en
 * el adaptador de infraestructura. Este módulo sólo conoce la forma de
 * los eventos y la aritmética de ventanas — deliberadamente sin I/O
 * para que las doce propiedades de agregación se puedan verificar con
 * pruebas basadas en propiedades sin tocar una base de datos.
 * =================================================================
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Cola acotada de metadatos tipados; nunca un documento anidado libre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub capability: String,
    pub provider: String,
    pub cost: i64,
    pub charge: i64,
    pub timestamp_ms: i64,
    pub session_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub usage_units: Option<f64>,
    pub usage_unit_type: Option<String>,
    pub tier: Option<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub window_start: i64,
    pub window_end: i64,
    pub tenant_id: String,
    pub capability: String,
    pub provider: String,
    pub event_count: i64,
    pub total_cost: i64,
    pub total_charge: i64,
    pub total_duration_ms: i64,
    pub total_usage_units: f64,
}

/// Nombre de tenant reservado que marca una ventana procesada pero vacía,
/// distinguible de una ventana que aún no se procesó.
pub const SENTINEL_TENANT: &str = "__sentinel__";

impl UsageSummary {
    pub fn is_sentinel(&self) -> bool {
        self.tenant_id == SENTINEL_TENANT
    }
}

/// Redondea `timestamp_ms` hacia abajo al inicio de su ventana de
/// `window_ms` milisegundos.
pub fn window_start_for(timestamp_ms: i64, window_ms: i64) -> i64 {
    timestamp_ms.div_euclid(window_ms) * window_ms
}

/// Enumera los inicios de ventana estrictamente pasados que aún no se
/// han procesado, desde `high_water_mark` (inclusive) hasta la última
/// ventana que ya cerró antes de `now_ms`.
pub fn pending_past_windows(high_water_mark: i64, now_ms: i64, window_ms: i64) -> Vec<i64> {
    let floor_now = window_start_for(now_ms, window_ms);
    let mut windows = Vec::new();
    let mut ws = high_water_mark;
    while ws + window_ms <= floor_now {
        windows.push(ws);
        ws += window_ms;
    }
    windows
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    event_count: i64,
    total_cost: i64,
    total_charge: i64,
    total_duration_ms: i64,
    total_usage_units: f64,
}

/// Agrupa los eventos que caen en la ventana semiabierta `[window_start,
/// window_start+window_ms)` por (tenant, capability, provider) y produce
/// un `UsageSummary` por grupo. Si la ventana no tuvo eventos, produce
/// exactamente un renglón centinela para que el llamador pueda marcarla
/// como procesada sin confundirla con una ventana nunca tocada.
pub fn summarize_window(
    events: &[MeterEvent],
    window_start: i64,
    window_ms: i64,
) -> Vec<UsageSummary> {
    let window_end = window_start + window_ms;
    let mut groups: BTreeMap<(String, String, String), Accumulator> = BTreeMap::new();

    for event in events {
        if event.timestamp_ms < window_start || event.timestamp_ms >= window_end {
            continue;
        }
        let key = (
            event.tenant_id.clone(),
            event.capability.clone(),
            event.provider.clone(),
        );
        let acc = groups.entry(key).or_default();
        acc.event_count += 1;
        acc.total_cost += event.cost;
        acc.total_charge += event.charge;
        acc.total_duration_ms += event.duration_ms.unwrap_or(0);
        acc.total_usage_units += event.usage_units.unwrap_or(0.0);
    }

    if groups.is_empty() {
        return vec![UsageSummary {
            window_start,
            window_end,
            tenant_id: SENTINEL_TENANT.to_string(),
            capability: String::new(),
            provider: String::new(),
            event_count: 0,
            total_cost: 0,
            total_charge: 0,
            total_duration_ms: 0,
            total_usage_units: 0.0,
        }];
    }

    groups
        .into_iter()
        .map(|((tenant_id, capability, provider), acc)| UsageSummary {
            window_start,
            window_end,
            tenant_id,
            capability,
            provider,
            event_count: acc.event_count,
            total_cost: acc.total_cost,
            total_charge: acc.total_charge,
            total_duration_ms: acc.total_duration_ms,
            total_usage_units: acc.total_usage_units,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tenant: &str, ts: i64, cost: i64, charge: i64) -> MeterEvent {
        MeterEvent {
            id: Uuid::new_v4(),
            tenant_id: tenant.into(),
            capability: "chat".into(),
            provider: "openai".into(),
            cost,
            charge,
            timestamp_ms: ts,
            session_id: None,
            duration_ms: Some(10),
            usage_units: Some(1.0),
            usage_unit_type: Some("call".into()),
            tier: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn window_start_floors_to_window_size() {
        assert_eq!(window_start_for(65_000, 60_000), 60_000);
        assert_eq!(window_start_for(60_000, 60_000), 60_000);
        assert_eq!(window_start_for(59_999, 60_000), 0);
    }

    #[test]
    fn boundary_event_at_window_end_belongs_to_next_window() {
        let events = vec![event("t1", 60_000, 5, 10)];
        let first = summarize_window(&events, 0, 60_000);
        assert!(first[0].is_sentinel());
        let second = summarize_window(&events, 60_000, 60_000);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tenant_id, "t1");
    }

    #[test]
    fn empty_window_produces_exactly_one_sentinel_row() {
        let summaries = summarize_window(&[], 0, 60_000);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].is_sentinel());
    }

    #[test]
    fn groups_by_tenant_capability_provider() {
        let events = vec![
            event("t1", 1_000, 1, 2),
            event("t1", 2_000, 3, 4),
            event("t2", 1_500, 5, 6),
        ];
        let summaries = summarize_window(&events, 0, 60_000);
        assert_eq!(summaries.len(), 2);
        let t1 = summaries.iter().find(|s| s.tenant_id == "t1").unwrap();
        assert_eq!(t1.event_count, 2);
        assert_eq!(t1.total_cost, 4);
        assert_eq!(t1.total_charge, 6);
    }

    #[test]
    fn pending_windows_never_include_the_current_window() {
        let windows = pending_past_windows(0, 150_000, 60_000);
        assert_eq!(windows, vec![0, 60_000]);
    }

    #[test]
    fn rerunning_aggregate_over_same_window_is_idempotent() {
        let events = vec![event("t1", 1_000, 1, 2)];
        let first = summarize_window(&events, 0, 60_000);
        let second = summarize_window(&events, 0, 60_000);
        assert_eq!(first, second);
    }
}
