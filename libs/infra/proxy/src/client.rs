// [libs/infra/proxy/src/client.rs]
/*!
 * Cliente HTTP hacia el reverse-proxy de borde. Reconcilia el mapa
 * subdominio -> upstream que el proxy sirve realmente; la Migración y la
 * Recuperación son sus únicos llamadores.
 */

use std::time::Duration;

use botplane_domain_errors::DomainError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::validate::{validate_subdomain, validate_upstream_host};

const REQUEST_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub subdomain: String,
    pub upstream_host: String,
    pub upstream_port: u16,
}

impl RouteSpec {
    pub fn new(subdomain: impl Into<String>, upstream_host: impl Into<String>, upstream_port: u16) -> Result<Self, DomainError> {
        let subdomain = subdomain.into();
        let upstream_host = upstream_host.into();
        validate_subdomain(&subdomain)?;
        validate_upstream_host(&upstream_host)?;
        Ok(Self { subdomain, upstream_host, upstream_port })
    }
}

/// Contrato de reconciliación que la Migración y la Recuperación
/// consumen contra el proxy de borde; una sola implementación concreta
/// existe hoy.
pub trait RoutingReconciler {
    async fn add_route(&self, route: &RouteSpec) -> Result<(), DomainError>;

    async fn remove_route(&self, subdomain: &str) -> Result<(), DomainError>;

    async fn update_health(&self, subdomain: &str, healthy: bool) -> Result<(), DomainError>;

    async fn reload(&self) -> Result<(), DomainError>;
}

pub struct ReverseProxyClient {
    http: Client,
    admin_base_url: String,
    admin_token: String,
}

impl ReverseProxyClient {
    pub fn new(admin_base_url: impl Into<String>, admin_token: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
                .user_agent("botplane-control-plane/1.0")
                .build()
                .expect("failed to initialize reverse-proxy HTTP client"),
            admin_base_url: admin_base_url.into(),
            admin_token: admin_token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.admin_base_url, path)
    }

    async fn fault_on_non_success(response: reqwest::Response) -> Result<reqwest::Response, DomainError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "reverse-proxy admin API rejected the request");
        if status.is_client_error() {
            Err(DomainError::InvalidUpstream(format!("proxy rejected request: {body}")))
        } else {
            Err(DomainError::Transient(format!("proxy returned {status}")))
        }
    }

    /// Compone quitar+agregar+recargar en una sola operación: ni la
    /// Migración ni la Recuperación quieren orquestar tres llamadas por
    /// separado cuando lo único que necesitan es mover a un tenant a un
    /// nuevo host.
    pub async fn reassign_tenant(&self, subdomain: &str, new_host: &str, new_port: u16) -> Result<(), DomainError> {
        let route = RouteSpec::new(subdomain, new_host, new_port)?;
        let _ = self.remove_route(subdomain).await;
        self.add_route(&route).await?;
        self.reload().await
    }
}

impl RoutingReconciler for ReverseProxyClient {
    async fn add_route(&self, route: &RouteSpec) -> Result<(), DomainError> {
        validate_subdomain(&route.subdomain)?;
        validate_upstream_host(&route.upstream_host)?;

        let response = self
            .http
            .put(self.endpoint(&format!("/routes/{}", route.subdomain)))
            .bearer_auth(&self.admin_token)
            .json(route)
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Self::fault_on_non_success(response).await?;
        Ok(())
    }

    async fn remove_route(&self, subdomain: &str) -> Result<(), DomainError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/routes/{subdomain}")))
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Self::fault_on_non_success(response).await?;
        Ok(())
    }

    async fn update_health(&self, subdomain: &str, healthy: bool) -> Result<(), DomainError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("/routes/{subdomain}/health")))
            .bearer_auth(&self.admin_token)
            .json(&serde_json::json!({ "healthy": healthy }))
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Self::fault_on_non_success(response).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), DomainError> {
        let response = self
            .http
            .post(self.endpoint("/reload"))
            .bearer_auth(&self.admin_token)
            .send()
            .await
            .map_err(|e| DomainError::Transient(e.to_string()))?;
        Self::fault_on_non_success(response).await?;
        Ok(())
    }
}
