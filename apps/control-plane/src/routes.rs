// [apps/control-plane/src/routes.rs]
/*!
 * =================================================================
 * APARATO: CONTROL PLANE ROUTING MATRIX (V1.0)
 * CLASIFICACIÓN: API ADAPTER LAYER (ESTRATO L3)
 * RESPONSABILIDAD: TOPOLOGÍA HTTP/WEBSOCKET EXPUESTA POR EL PROCESO
 *
 * Superficie deliberadamente mínima: la ingestión de trabajo llega casi
 * toda por el canal de comando WebSocket y por los bucles de fondo, no
 * por REST. Lo único que necesita un endpoint HTTP explícito es el
 * sondeo de salud, la apertura del uplink de un nodo y el webhook del
 * procesador de pagos.
 * =================================================================
 */

use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{channel, health, payments_webhook};
use crate::state::AppState;

pub fn create_control_plane_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any).max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health::handle_health_check))
        .route("/ws/channel/:node_id", get(channel::handle_node_channel_upgrade))
        .route("/webhooks/payments", post(payments_webhook::handle_payment_webhook))
        .layer(cors)
        .with_state(state)
}
