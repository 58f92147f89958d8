// [libs/infra/db/src/repositories/audit.rs]
/*!
 * Registro de auditoría administrativa, estrictamente append-only. La
 * exportación CSV delega en `AdminAuditEntry::to_csv_row` para que el
 * formato de cada fila sea el mismo tanto en este repositorio como en
 * las pruebas puras del crate de dominio.
 */

use std::sync::Arc;

use botplane_domain_errors::DomainError;
use botplane_domain_models::{AdminAuditEntry, AUDIT_CSV_HEADER};
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct AuditRepository {
    client: Arc<DbClient>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

impl AuditRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn append(
        &self,
        admin_user: &str,
        action: &str,
        category: &str,
        target_tenant: Option<&str>,
        target_user: Option<&str>,
        details_json: Option<&str>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        outcome: &str,
    ) -> Result<AdminAuditEntry, DomainError> {
        let entry = AdminAuditEntry {
            id: Uuid::new_v4().to_string(),
            admin_user: admin_user.to_string(),
            action: action.to_string(),
            category: category.to_string(),
            target_tenant: target_tenant.map(str::to_string),
            target_user: target_user.map(str::to_string),
            details_json: details_json.map(str::to_string),
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: Utc::now(),
            outcome: outcome.to_string(),
        };

        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO admin_audit_log
                    (id, admin_user, action, category, target_tenant, target_user,
                     details_json, ip_address, user_agent, created_at, outcome)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id.clone(),
                    entry.admin_user.clone(),
                    entry.action.clone(),
                    entry.category.clone(),
                    entry.target_tenant.clone(),
                    entry.target_user.clone(),
                    entry.details_json.clone(),
                    entry.ip_address.clone(),
                    entry.user_agent.clone(),
                    entry.created_at.to_rfc3339(),
                    entry.outcome.clone(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(entry)
    }

    pub async fn query(
        &self,
        target_tenant: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AdminAuditEntry>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, admin_user, action, category, target_tenant, target_user,
                        details_json, ip_address, user_agent, created_at, outcome
                 FROM admin_audit_log
                 WHERE (?1 IS NULL OR target_tenant = ?1)
                   AND (?2 IS NULL OR created_at >= ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3",
                params![target_tenant, since.map(|t| t.to_rfc3339()), limit],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let created_at_raw: String = row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            entries.push(AdminAuditEntry {
                id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                admin_user: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                action: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                category: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                target_tenant: row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                target_user: row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                details_json: row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                ip_address: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                user_agent: row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                created_at: parse_timestamp(&created_at_raw).map_err(DomainError::from)?,
                outcome: row.get(10).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            });
        }
        Ok(entries)
    }

    pub async fn export_csv(&self, target_tenant: Option<&str>) -> Result<String, DomainError> {
        let entries = self.query(target_tenant, None, i64::MAX).await?;
        let mut csv = String::from(AUDIT_CSV_HEADER);
        csv.push('\n');
        for entry in &entries {
            csv.push_str(&entry.to_csv_row());
            csv.push('\n');
        }
        Ok(csv)
    }
}
