// [libs/infra/payments/src/client.rs]
/*!
 * Cliente HTTP hacia el procesador de pagos. Autentica con una clave
 * secreta Bearer, como la API de Stripe, sin vendorizar su SDK.
 */

use std::time::Duration;

use botplane_domain_errors::DomainError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

const REQUEST_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodSummary {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub is_default: bool,
}

/// Contrato que el Auto-Top-Up Controller y el flujo de compra manual
/// consumen. Una sola implementación concreta (`StripeLikeProcessor`)
/// existe hoy; el trait existe para que un procesador alternativo no
/// requiera tocar a sus llamadores.
pub trait PaymentProcessor {
    async fn charge_saved_method(
        &self,
        tenant_id: &str,
        payment_method_id: &str,
        amount_cents: i64,
        idempotency_key: &str,
    ) -> Result<String, DomainError>;

    async fn list_payment_methods(&self, tenant_id: &str) -> Result<Vec<PaymentMethodSummary>, DomainError>;

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), DomainError>;

    async fn create_checkout_session(
        &self,
        tenant_id: &str,
        amount_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<String, DomainError>;
}

pub struct StripeLikeProcessor {
    http: Client,
    api_base_url: String,
    secret_key: String,
}

impl StripeLikeProcessor {
    pub fn new(api_base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
                .user_agent("botplane-control-plane/1.0")
                .build()
                .expect("failed to initialize payment processor HTTP client"),
            api_base_url: api_base_url.into(),
            secret_key: secret_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    async fn fault_on_non_success(response: reqwest::Response) -> Result<reqwest::Response, DomainError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "payment processor rejected the request");
        if status.is_client_error() {
            Err(DomainError::InvalidUpstream(format!("processor rejected request: {body}")))
        } else {
            Err(DomainError::Transient(format!("processor returned {status}")))
        }
    }
}

impl PaymentProcessor for StripeLikeProcessor {
    async fn charge_saved_method(
        &self,
        tenant_id: &str,
        payment_method_id: &str,
        amount_cents: i64,
        idempotency_key: &str,
    ) -> Result<String, DomainError> {
        let response = self
            .http
            .post(self.endpoint("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&[
                ("amount", amount_cents.to_string()),
                ("currency", "usd".to_string()),
                ("customer", tenant_id.to_string()),
                ("payment_method", payment_method_id.to_string()),
                ("off_session", "true".to_string()),
                ("confirm", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;

        let response = Self::fault_on_non_success(response).await?;
        let body: Value = response.json().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DomainError::InvalidUpstream("missing payment_intent id in response".into()))
    }

    async fn list_payment_methods(&self, tenant_id: &str) -> Result<Vec<PaymentMethodSummary>, DomainError> {
        let response = self
            .http
            .get(self.endpoint("/v1/payment_methods"))
            .bearer_auth(&self.secret_key)
            .query(&[("customer", tenant_id), ("type", "card")])
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;

        let response = Self::fault_on_non_success(response).await?;
        let body: Value = response.json().await.map_err(|e| DomainError::Transient(e.to_string()))?;

        let methods = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(methods
            .into_iter()
            .filter_map(|entry| {
                Some(PaymentMethodSummary {
                    id: entry.get("id")?.as_str()?.to_string(),
                    brand: entry
                        .get("card")
                        .and_then(|c| c.get("brand"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    last4: entry
                        .get("card")
                        .and_then(|c| c.get("last4"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    is_default: false,
                })
            })
            .collect())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), DomainError> {
        let response = self
            .http
            .post(self.endpoint(&format!("/v1/payment_methods/{payment_method_id}/detach")))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Self::fault_on_non_success(response).await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        tenant_id: &str,
        amount_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<String, DomainError> {
        let response = self
            .http
            .post(self.endpoint("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("mode", "payment".to_string()),
                ("client_reference_id", tenant_id.to_string()),
                ("line_items[0][price_data][currency]", "usd".to_string()),
                ("line_items[0][price_data][unit_amount]", amount_cents.to_string()),
                ("line_items[0][price_data][product_data][name]", "Botplane credits".to_string()),
                ("line_items[0][quantity]", "1".to_string()),
                ("success_url", success_url.to_string()),
                ("cancel_url", cancel_url.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;

        let response = Self::fault_on_non_success(response).await?;
        let body: Value = response.json().await.map_err(|e| DomainError::Transient(e.to_string()))?;
        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DomainError::InvalidUpstream("missing checkout session url in response".into()))
    }
}
