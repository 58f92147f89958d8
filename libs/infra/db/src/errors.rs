// [libs/infra/db/src/errors.rs]
//! Frontera de traducción entre `libsql::Error` y `DomainError`. Ningún
//! repositorio propaga un `libsql::Error` crudo hacia el resto del árbol.

use botplane_domain_errors::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("fallo de conexión con el almacén persistente: {0}")]
    ConnectionError(String),

    #[error("configuración de base de datos inválida: {0}")]
    ConfigurationError(String),

    #[error("fallo de consulta: {0}")]
    QueryError(#[from] libsql::Error),

    #[error("no se pudo proyectar la fila en el tipo de dominio: {0}")]
    MappingError(String),
}

impl From<DbError> for DomainError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ConnectionError(msg) => DomainError::Transient(msg),
            DbError::ConfigurationError(msg) => DomainError::Fatal(msg),
            DbError::QueryError(inner) => DomainError::Transient(inner.to_string()),
            DbError::MappingError(msg) => DomainError::Fatal(msg),
        }
    }
}
