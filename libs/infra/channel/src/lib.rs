// [libs/infra/channel/src/lib.rs]
/*!
 * =================================================================
 * APARATO: NODE COMMAND CHANNEL (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: INFRAESTRUCTURA DE TRANSPORTE (ESTRATO L3)
 * RESPONSABILIDAD: ENLACE FULL-DUPLEX Y CORRELACIÓN DE MANDOS
 *
 * El registro de conexiones vive aquí; la persistencia del estado de
 * flota (`nodes`, latidos) se queda fuera de este crate a propósito —
 * el socket sólo publica los eventos que recibe de un nodo en el canal
 * `events` que el llamador le entrega, y el llamador decide qué hacer
 * con ellos (mutar el Node Registry en memoria, escribir a libSQL).
 * =================================================================
 */

pub mod protocol;
pub mod registry;
pub mod socket;

pub use protocol::{ClientFrame, NodeChannelEvent, ServerCommand};
pub use registry::ChannelRegistry;
pub use socket::handle_node_uplink;
