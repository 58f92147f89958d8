// [apps/control-plane/src/lib.rs]
/*!
 * =================================================================
 * APARATO: CONTROL PLANE LIBRARY ROOT (V1.0 - GENESIS)
 * CLASIFICACIÓN: COMPOSITION ROOT (ESTRATO L1-APP)
 * RESPONSABILIDAD: DECLARACIÓN DE MÓDULOS Y PUNTO DE ENTRADA PROGRAMÁTICO
 *
 * `main.rs` es deliberadamente delgado: toda la lógica de arranque vive
 * aquí para que `migrator` y `seed` puedan reutilizarla sin levantar el
 * servidor HTTP.
 * =================================================================
 */

pub mod config;
pub mod handlers;
pub mod kernel;
pub mod routes;
pub mod services;
pub mod state;

pub use config::Settings;
pub use kernel::ControlPlaneKernel;
pub use state::AppState;
