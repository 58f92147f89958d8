// [libs/domain/errors/src/lib.rs]
/*!
 * =================================================================
 * APARATO: DOMAIN ERROR TAXONOMY (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: CROSS-CUTTING CONTRACT (ESTRATO L2)
 * RESPONSABILIDAD: VOCABULARIO UNIFICADO DE FALLO PARA TODO EL WORKSPACE
 *
 * Cada crate del plano de control devuelve este mismo enum en lugar de
 * inventar su propia taxonomía local. Los adaptadores externos (HTTP,
 * WebSocket) son los únicos responsables de traducirlo a un código de
 * transporte; el resto del árbol de llamadas lo propaga verbatim.
 * =================================================================
 */

use thiserror::Error;

/// Taxonomía de errores de dominio, compartida por ledger, metering,
/// fleet, notification y sus adaptadores de infraestructura.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient balance for tenant {tenant_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        tenant_id: String,
        requested: i64,
        available: i64,
    },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no capacity available for placement")]
    NoCapacity,

    #[error("node {0} has no open command channel")]
    NodeNotConnected(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid upstream: {0}")]
    InvalidUpstream(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl DomainError {
    /// True when the caller may reasonably retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Transient(_))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
