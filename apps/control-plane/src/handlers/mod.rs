// [apps/control-plane/src/handlers/mod.rs]
/*!
 * Adaptadores HTTP/WebSocket: cada uno traduce una petición externa a una
 * llamada contra `AppState` y traduce el `DomainError` resultante a un
 * código de transporte. Ninguno contiene lógica de negocio propia.
 */

pub mod channel;
pub mod health;
pub mod payments_webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use botplane_domain_errors::DomainError;
use serde_json::json;

/// Envoltorio fino para traducir `DomainError` al código de transporte
/// correspondiente; vive aquí en lugar de en `botplane_domain_errors`
/// porque ese crate es puro y no conoce axum.
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DomainError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
            DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::NodeNotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            DomainError::InvalidSignature => StatusCode::UNAUTHORIZED,
            DomainError::InvalidUpstream(_) => StatusCode::BAD_GATEWAY,
            DomainError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
