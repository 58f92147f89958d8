// [libs/domain/models/src/vault.rs]
/*!
 * Bóveda de credenciales por tenant/proveedor. El texto plano nunca se
 * almacena ni se devuelve; este tipo sólo transporta el payload cifrado.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantApiKey {
    pub tenant_id: String,
    pub provider: String,
    pub encrypted_payload: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}
