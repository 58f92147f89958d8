// [libs/domain/models/src/lib.rs]
/*!
 * =================================================================
 * APARATO: DOMAIN MODELS ROOT (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: SINGLE SOURCE OF TRUTH (ESTRATO L2)
 * RESPONSABILIDAD: ENTIDADES COMPARTIDAS DE FLOTA Y RECUPERACIÓN
 * =================================================================
 */

pub mod audit;
pub mod fleet;
pub mod recovery;
pub mod vault;

pub use audit::{AdminAuditEntry, AUDIT_CSV_HEADER};
pub use fleet::{BillingState, BotInstance, BotProfile, Node, NodeStatus, ReleaseChannel, RestartPolicy, UpdatePolicy};
pub use recovery::{
    RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger,
    REASON_MAX_RETRIES_EXCEEDED, REASON_NO_CAPACITY,
};
pub use vault::TenantApiKey;
