// [libs/infra/proxy/src/lib.rs]
/*!
 * =================================================================
 * APARATO: REVERSE-PROXY RECONCILER (V1.0)
 * CLASIFICACIÓN: CLIENTE DE INFRAESTRUCTURA (ESTRATO L2-INFRA)
 * RESPONSABILIDAD: TRADUCIR DECISIONES DE COLOCACIÓN EN RUTAS DE BORDE
 *
 * Sin resolución DNS real: un hostname sólo se rechaza pre-conexión si
 * cae en un sufijo reservado conocido (`localhost`, `.local`,
 * `.internal`); un literal de IP se valida directamente contra los
 * rangos privados, loopback y link-local. Ningún crate del resto del
 * stack trae un resolvedor DNS asíncrono, así que esta es la frontera
 * deliberada de la validación SSRF de este aparato.
 * =================================================================
 */

mod client;
mod validate;

pub use client::{ReverseProxyClient, RouteSpec, RoutingReconciler};
pub use validate::{validate_subdomain, validate_upstream_host};
