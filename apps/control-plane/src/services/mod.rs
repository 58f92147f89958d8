// [apps/control-plane/src/services/mod.rs]
/*!
 * Servicios de aplicación: cada uno compone dominio + infraestructura
 * en una operación orquestada. Ninguno contiene su propia conexión a
 * libSQL ni su propio cliente HTTP — todos reciben lo que necesitan
 * desde `AppState` al construirse en `kernel::ignite`.
 */

pub mod autotopup;
pub mod liveness_sweeper;
pub mod meter_aggregate;
pub mod meter_flush;
pub mod migration;
pub mod notification_dispatcher;
pub mod recovery;

pub use autotopup::AutoTopupController;
pub use liveness_sweeper::LivenessSweeper;
pub use meter_aggregate::MeterAggregator;
pub use meter_flush::MeterFlusher;
pub use migration::{MigrationEngine, MigrationResult};
pub use notification_dispatcher::{NotificationDispatcher, NotificationSender, TracingNotificationSender};
pub use recovery::RecoveryManager;
