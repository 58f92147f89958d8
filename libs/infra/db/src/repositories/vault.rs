// [libs/infra/db/src/repositories/vault.rs]
/*!
 * Bóveda de claves API por tenant/proveedor. El cifrado/descifrado del
 * payload ocurre en el llamador (servicio de aplicación); este
 * repositorio nunca ve texto plano, sólo el blob ya cifrado.
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_models::TenantApiKey;
use chrono::{DateTime, Utc};
use libsql::params;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct VaultRepository {
    client: Arc<DbClient>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

impl VaultRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn upsert(&self, key: &TenantApiKey) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO tenant_api_keys (tenant_id, provider, encrypted_payload, label, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, provider) DO UPDATE SET
                    encrypted_payload = excluded.encrypted_payload,
                    label = excluded.label",
                params![
                    key.tenant_id.clone(),
                    key.provider.clone(),
                    key.encrypted_payload.clone(),
                    key.label.clone(),
                    key.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    pub async fn get(&self, tenant_id: &str, provider: &str) -> Result<Option<TenantApiKey>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT tenant_id, provider, encrypted_payload, label, created_at
                 FROM tenant_api_keys WHERE tenant_id = ?1 AND provider = ?2",
                params![tenant_id, provider],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        else {
            return Ok(None);
        };

        let created_at_raw: String = row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(Some(TenantApiKey {
            tenant_id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            provider: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            encrypted_payload: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            label: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            created_at: parse_timestamp(&created_at_raw).map_err(DomainError::from)?,
        }))
    }

    pub async fn delete(&self, tenant_id: &str, provider: &str) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "DELETE FROM tenant_api_keys WHERE tenant_id = ?1 AND provider = ?2",
                params![tenant_id, provider],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }
}
