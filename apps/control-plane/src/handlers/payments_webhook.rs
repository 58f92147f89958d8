// [apps/control-plane/src/handlers/payments_webhook.rs]
/*!
 * =================================================================
 * APARATO: PAYMENT WEBHOOK RECEIVER (V1.0)
 * CLASIFICACIÓN: API HANDLER (ESTRATO L4)
 * RESPONSABILIDAD: ACREDITAR COMPRAS DE CRÉDITO CONFIRMADAS POR EL PROCESADOR
 *
 * `StripeLikeProcessor` no expone un `handle_webhook` unificado, así que
 * este manejador verifica la firma directamente contra
 * `verify_webhook_signature` y decodifica sólo la forma de evento que le
 * interesa al libro mayor: una sesión de checkout completada.
 * =================================================================
 */

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use botplane_domain_billing::TransactionType;
use botplane_infra_payments::verify_webhook_signature;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::handlers::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CheckoutCompletedEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: CheckoutCompletedData,
}

#[derive(Debug, Deserialize)]
struct CheckoutCompletedData {
    tenant_id: String,
    amount_cents: i64,
}

#[instrument(skip(state, headers, raw_body))]
pub async fn handle_payment_webhook(State(state): State<AppState>, headers: HeaderMap, raw_body: axum::body::Bytes) -> Result<StatusCode, ApiError> {
    let timestamp = headers
        .get("X-Webhook-Timestamp")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| botplane_domain_errors::DomainError::InvalidSignature)?;
    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| botplane_domain_errors::DomainError::InvalidSignature)?;

    if !verify_webhook_signature(&raw_body, timestamp, signature, &state.settings.payment_webhook_secret) {
        warn!("💳 [WEBHOOK_SIGNATURE_REJECTED]");
        return Err(botplane_domain_errors::DomainError::InvalidSignature.into());
    }

    let event: CheckoutCompletedEvent = serde_json::from_slice(&raw_body)
        .map_err(|err| botplane_domain_errors::DomainError::InvalidInput(format!("malformed webhook payload: {err}")))?;

    if event.event_type != "checkout.session.completed" {
        return Ok(StatusCode::OK);
    }

    let reference_id = format!("checkout-{}", event.id);
    if state.ledger.has_reference_id(&reference_id).await? {
        return Ok(StatusCode::OK);
    }

    state
        .ledger
        .credit(
            &event.data.tenant_id,
            event.data.amount_cents,
            TransactionType::Purchase,
            Some("checkout session completed"),
            Some(reference_id.as_str()),
            Some("stripe_webhook"),
            None,
        )
        .await?;

    Ok(StatusCode::OK)
}
