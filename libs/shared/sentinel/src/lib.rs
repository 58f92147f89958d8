// [libs/shared/sentinel/src/lib.rs]
/*!
 * =================================================================
 * APARATO: SENTINEL OBSERVABILITY KERNEL (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: SHARED UTILITY (ESTRATO L1)
 * RESPONSABILIDAD: TELEMETRÍA ESTRUCTURADA Y CAPTURA DE PÁNICOS
 *
 * Un único punto de ignición llamado una vez desde `main`. El resto del
 * árbol de llamadas sólo conoce las macros de `tracing`; nunca vuelve a
 * tocar el suscriptor global.
 * =================================================================
 */

use std::panic;
use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as formatting_layer, EnvFilter};

/// Inicializa el registro de trazas con blindaje de pánicos global.
///
/// - Desarrollo (`APP_ENV` ausente o distinto de `production`): salida
///   compacta y legible.
/// - Producción (`APP_ENV=production`): una línea JSON por evento,
///   apta para ingesta por un colector externo.
#[instrument(skip_all)]
pub fn init_tracing(service_nominal_identifier: &str) {
    let environmental_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}={level},tower_http=warn,hyper=warn,libsql=error",
            service_nominal_identifier,
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    let is_production_strata = std::env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    if is_production_strata {
        tracing_subscriber::registry()
            .with(environmental_filter)
            .with(formatting_layer::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(environmental_filter)
            .with(formatting_layer::layer().compact().with_target(false))
            .init();
    }

    let service_id_snapshot = service_nominal_identifier.to_string();
    panic::set_hook(Box::new(move |panic_metadata| {
        let panic_location = panic_metadata
            .location()
            .map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()))
            .unwrap_or_else(|| "UNKNOWN_LOCATION".to_string());

        let panic_payload_message = panic_metadata
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_metadata.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("UNDEFINED_PANIC_PAYLOAD");

        error!(
            target: "panic_monitor",
            service = %service_id_snapshot,
            location = %panic_location,
            "💀 [CRITICAL_PANIC]: Thread terminated abruptly. Analysis: {}",
            panic_payload_message
        );
    }));

    info!(
        "👁️ [SENTINEL_ONLINE]: Observability initialized for [{}].",
        service_nominal_identifier
    );
}
