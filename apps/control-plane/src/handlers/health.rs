// [apps/control-plane/src/handlers/health.rs]
use axum::http::StatusCode;

pub async fn handle_health_check() -> StatusCode {
    StatusCode::OK
}
