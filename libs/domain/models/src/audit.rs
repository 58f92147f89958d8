// [libs/domain/models/src/audit.rs]
/*!
 * Registro de auditoría administrativa: estrictamente append-only,
 * sin operaciones de actualización ni borrado por diseño.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAuditEntry {
    pub id: String,
    pub admin_user: String,
    pub action: String,
    pub category: String,
    pub target_tenant: Option<String>,
    pub target_user: Option<String>,
    pub details_json: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub outcome: String,
}

/// Encabezado literal exigido para la exportación CSV del log de auditoría.
pub const AUDIT_CSV_HEADER: &str =
    "id,admin_user,action,category,target_tenant,target_user,details,ip_address,user_agent,created_at,outcome";

/// Escapa un campo según la regla de comillas CSV (RFC 4180): si el campo
/// contiene coma, comilla o salto de línea, se envuelve en comillas y toda
/// comilla interna se duplica.
pub fn csv_quote_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl AdminAuditEntry {
    pub fn to_csv_row(&self) -> String {
        let fields = [
            self.id.as_str(),
            self.admin_user.as_str(),
            self.action.as_str(),
            self.category.as_str(),
            self.target_tenant.as_deref().unwrap_or(""),
            self.target_user.as_deref().unwrap_or(""),
            self.details_json.as_deref().unwrap_or(""),
            self.ip_address.as_deref().unwrap_or(""),
            self.user_agent.as_deref().unwrap_or(""),
        ];
        let mut row: Vec<String> = fields.iter().map(|f| csv_quote_escape(f)).collect();
        row.push(self.created_at.to_rfc3339());
        row.push(csv_quote_escape(&self.outcome));
        row.join(",")
    }
}
