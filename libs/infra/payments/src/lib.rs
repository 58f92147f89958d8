// [libs/infra/payments/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PAYMENT PROCESSOR ADAPTER (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: INFRASTRUCTURE ADAPTER (ESTRATO L3)
 * RESPONSABILIDAD: ENLACE HTTP CON EL PROCESADOR DE PAGOS EXTERNO
 *
 * El procesador concreto vive detrás del trait `PaymentProcessor` para
 * que el Auto-Top-Up Controller y el flujo de compra manual dependan de
 * un contrato, no de la forma de la API de un proveedor particular.
 * `StripeLikeProcessor` es la única implementación; su forma de
 * autenticación y de firma de webhook sigue el patrón de Stripe sin
 * vendorizar su SDK.
 * =================================================================
 */

pub mod client;
pub mod webhook;

pub use client::{PaymentMethodSummary, PaymentProcessor, StripeLikeProcessor};
pub use webhook::verify_webhook_signature;
