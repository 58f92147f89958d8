// [libs/infra/db/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PERSISTENCE ADAPTER (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: INFRAESTRUCTURA (ESTRATO L3)
 * RESPONSABILIDAD: PUENTE ENTRE EL DOMINIO PURO Y LIBSQL
 *
 * Cada repositorio traduce entre las estructuras de `botplane-domain-*`
 * y filas de libSQL. Ningún repositorio contiene lógica de negocio que
 * no dependa de una lectura o escritura; la lógica pura vive en los
 * crates de dominio y es invocada desde aquí o desde los servicios del
 * binario de aplicación.
 * =================================================================
 */

pub mod client;
pub mod errors;
pub mod schema;

pub mod repositories {
    pub mod audit;
    pub mod fleet;
    pub mod ledger;
    pub mod metering;
    pub mod notification;
    pub mod recovery;
    pub mod vault;
}

pub use client::DbClient;
pub use errors::DbError;

pub use repositories::audit::AuditRepository;
pub use repositories::fleet::FleetRepository;
pub use repositories::ledger::LedgerRepository;
pub use repositories::metering::MeteringRepository;
pub use repositories::notification::NotificationRepository;
pub use repositories::recovery::RecoveryRepository;
pub use repositories::vault::VaultRepository;
