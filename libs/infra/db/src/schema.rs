// [libs/infra/db/src/schema.rs]
/*!
 * Bootstrap de esquema en tres etapas, todas idempotentes:
 *
 * 1. `TACTICAL_TABLES`     — `CREATE TABLE IF NOT EXISTS` para las tablas base.
 * 2. `EVOLUTIONARY_STRATA` — `ALTER TABLE ADD COLUMN` para columnas añadidas
 *    después del lanzamiento inicial; tolera "duplicate column name" como
 *    señal de que la migración ya se aplicó.
 * 3. `ACCELERATION_INDEXES` — índices, incluidos los `UNIQUE` que sostienen
 *    la idempotencia de inserciones (referencia de transacción, ventana de
 *    resumen de uso).
 */

use tracing::{debug, warn};

use crate::client::DbClient;
use crate::errors::DbError;

const TACTICAL_TABLES: &[(&str, &str)] = &[
    (
        "nodes",
        "CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            host TEXT NOT NULL,
            status TEXT NOT NULL,
            capacity_mb INTEGER NOT NULL,
            used_mb INTEGER NOT NULL DEFAULT 0,
            last_heartbeat_at TEXT NOT NULL,
            registered_at TEXT NOT NULL
        )",
    ),
    (
        "bot_profiles",
        "CREATE TABLE IF NOT EXISTS bot_profiles (
            bot_id TEXT PRIMARY KEY,
            image TEXT,
            env TEXT NOT NULL DEFAULT '{}',
            restart_policy TEXT NOT NULL DEFAULT 'on_failure',
            update_policy TEXT NOT NULL DEFAULT 'manual',
            release_channel TEXT NOT NULL DEFAULT 'stable'
        )",
    ),
    (
        "bot_instances",
        "CREATE TABLE IF NOT EXISTS bot_instances (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            node_id TEXT,
            billing_state TEXT NOT NULL,
            destroy_after TEXT,
            created_at TEXT NOT NULL
        )",
    ),
    (
        "credit_transactions",
        "CREATE TABLE IF NOT EXISTS credit_transactions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            tx_type TEXT NOT NULL,
            description TEXT,
            reference_id TEXT,
            funding_source TEXT,
            attributed_user_id TEXT,
            created_at TEXT NOT NULL
        )",
    ),
    (
        "credit_balances",
        "CREATE TABLE IF NOT EXISTS credit_balances (
            tenant_id TEXT PRIMARY KEY,
            balance INTEGER NOT NULL DEFAULT 0
        )",
    ),
    (
        "credit_auto_topup_settings",
        "CREATE TABLE IF NOT EXISTS credit_auto_topup_settings (
            tenant_id TEXT PRIMARY KEY,
            usage_enabled INTEGER NOT NULL DEFAULT 0,
            usage_threshold INTEGER NOT NULL DEFAULT 0,
            usage_topup_amount INTEGER NOT NULL DEFAULT 0,
            usage_consecutive_failures INTEGER NOT NULL DEFAULT 0,
            usage_charge_in_flight INTEGER NOT NULL DEFAULT 0,
            schedule_enabled INTEGER NOT NULL DEFAULT 0,
            schedule_amount INTEGER NOT NULL DEFAULT 0,
            schedule_interval_hours INTEGER NOT NULL DEFAULT 0,
            schedule_next_at TEXT,
            schedule_consecutive_failures INTEGER NOT NULL DEFAULT 0
        )",
    ),
    (
        "meter_events",
        "CREATE TABLE IF NOT EXISTS meter_events (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            provider TEXT NOT NULL,
            cost INTEGER NOT NULL,
            charge INTEGER NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            session_id TEXT,
            duration_ms INTEGER,
            usage_units REAL,
            usage_unit_type TEXT,
            tier TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        )",
    ),
    (
        "usage_summaries",
        "CREATE TABLE IF NOT EXISTS usage_summaries (
            id TEXT PRIMARY KEY,
            window_start INTEGER NOT NULL,
            window_end INTEGER NOT NULL,
            tenant_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            provider TEXT NOT NULL,
            event_count INTEGER NOT NULL,
            total_cost INTEGER NOT NULL,
            total_charge INTEGER NOT NULL,
            total_duration_ms INTEGER NOT NULL,
            total_usage_units REAL NOT NULL
        )",
    ),
    (
        "recovery_events",
        "CREATE TABLE IF NOT EXISTS recovery_events (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL,
            trigger TEXT NOT NULL,
            status TEXT NOT NULL,
            tenants_total INTEGER NOT NULL DEFAULT 0,
            tenants_recovered INTEGER NOT NULL DEFAULT 0,
            tenants_failed INTEGER NOT NULL DEFAULT 0,
            tenants_waiting INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            report_json TEXT
        )",
    ),
    (
        "recovery_items",
        "CREATE TABLE IF NOT EXISTS recovery_items (
            id TEXT PRIMARY KEY,
            recovery_event_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            source_node_id TEXT NOT NULL,
            target_node_id TEXT,
            status TEXT NOT NULL,
            reason TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )",
    ),
    (
        "notification_queue",
        "CREATE TABLE IF NOT EXISTS notification_queue (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            email_type TEXT NOT NULL,
            recipient_email TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            last_attempt_at TEXT,
            last_error TEXT,
            retry_after TEXT,
            sent_at TEXT
        )",
    ),
    (
        "tenant_api_keys",
        "CREATE TABLE IF NOT EXISTS tenant_api_keys (
            tenant_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            encrypted_payload TEXT NOT NULL,
            label TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, provider)
        )",
    ),
    (
        "admin_audit_log",
        "CREATE TABLE IF NOT EXISTS admin_audit_log (
            id TEXT PRIMARY KEY,
            admin_user TEXT NOT NULL,
            action TEXT NOT NULL,
            category TEXT NOT NULL,
            target_tenant TEXT,
            target_user TEXT,
            details_json TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL,
            outcome TEXT NOT NULL
        )",
    ),
];

const EVOLUTIONARY_STRATA: &[(&str, &str)] = &[(
    "bot_instances.destroy_after backfill",
    "ALTER TABLE bot_instances ADD COLUMN destroy_after TEXT",
)];

const ACCELERATION_INDEXES: &[(&str, &str)] = &[
    (
        "credit_transactions_reference_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_credit_transactions_reference
            ON credit_transactions (reference_id) WHERE reference_id IS NOT NULL",
    ),
    (
        "credit_transactions_tenant_created",
        "CREATE INDEX IF NOT EXISTS idx_credit_transactions_tenant_created
            ON credit_transactions (tenant_id, created_at)",
    ),
    (
        "usage_summaries_window_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_summaries_window
            ON usage_summaries (tenant_id, capability, provider, window_start)",
    ),
    (
        "meter_events_tenant_timestamp",
        "CREATE INDEX IF NOT EXISTS idx_meter_events_tenant_timestamp
            ON meter_events (tenant_id, timestamp_ms)",
    ),
    (
        "notification_queue_due",
        "CREATE INDEX IF NOT EXISTS idx_notification_queue_due
            ON notification_queue (status, retry_after)",
    ),
    (
        "recovery_items_event",
        "CREATE INDEX IF NOT EXISTS idx_recovery_items_event
            ON recovery_items (recovery_event_id)",
    ),
    (
        "admin_audit_log_created",
        "CREATE INDEX IF NOT EXISTS idx_admin_audit_log_created
            ON admin_audit_log (created_at)",
    ),
];

pub async fn apply_full_schema(client: &DbClient) -> Result<(), DbError> {
    solidify_base_tables(client).await?;
    execute_evolutionary_repair(client).await?;
    harden_access_layer(client).await?;
    Ok(())
}

async fn solidify_base_tables(client: &DbClient) -> Result<(), DbError> {
    let connection = client.get_connection()?;
    for (label, statement) in TACTICAL_TABLES {
        debug!(table = %label, "aplicando tabla táctica");
        connection.execute(statement, ()).await?;
    }
    Ok(())
}

async fn execute_evolutionary_repair(client: &DbClient) -> Result<(), DbError> {
    let connection = client.get_connection()?;
    for (label, statement) in EVOLUTIONARY_STRATA {
        match connection.execute(statement, ()).await {
            Ok(_) => debug!(migration = %label, "estrato evolutivo aplicado"),
            Err(e) if e.to_string().contains("duplicate column name") => {
                debug!(migration = %label, "estrato ya presente, se omite");
            }
            Err(e) => {
                warn!(migration = %label, error = %e, "fallo al aplicar estrato evolutivo");
                return Err(DbError::QueryError(e));
            }
        }
    }
    Ok(())
}

async fn harden_access_layer(client: &DbClient) -> Result<(), DbError> {
    let connection = client.get_connection()?;
    for (label, statement) in ACCELERATION_INDEXES {
        debug!(index = %label, "aplicando índice de aceleración");
        connection.execute(statement, ()).await?;
    }
    Ok(())
}
