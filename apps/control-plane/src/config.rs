// [apps/control-plane/src/config.rs]
/*!
 * =================================================================
 * APARATO: SETTINGS (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: CONFIGURACIÓN TIPADA (ESTRATO L1-APP)
 * RESPONSABILIDAD: ÚNICA FUENTE DE VERDAD PARA PARÁMETROS DE ARRANQUE
 *
 * Cargada una sola vez en `kernel::ignite` y clonada hacia cada bucle de
 * fondo y manejador que la necesite. No existe una configuración global
 * mutable oculta en ningún otro punto del árbol de llamadas.
 * =================================================================
 */

use std::env;
use std::time::Duration;

/// Configuración tipada del plano de control, poblada desde variables de
/// entorno (con soporte `.env` vía `dotenvy` para desarrollo local).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database_auth_token: Option<String>,

    pub wal_path: String,
    pub dead_letter_path: String,

    pub meter_batch_size: usize,
    pub meter_flush_interval: Duration,
    pub aggregation_window_ms: i64,
    pub aggregation_poll_interval: Duration,

    pub heartbeat_timeout: Duration,
    pub liveness_sweep_interval: Duration,

    pub recovery_retry_interval: Duration,
    pub recovery_time_cap_hours: i64,
    pub recovery_item_retry_cap: i64,

    pub notification_max_attempts: i32,
    pub notification_backoff_cap_minutes: i64,
    pub notification_dispatch_interval: Duration,

    pub autotopup_schedule_poll_interval: Duration,

    pub command_channel_timeout: Duration,

    pub http_bind_address: String,

    pub payment_processor_base_url: String,
    pub payment_processor_secret_key: String,
    pub payment_webhook_secret: String,

    pub proxy_admin_base_url: String,
    pub proxy_admin_token: String,

    pub admin_notification_email: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|raw| raw.parse().ok()).unwrap_or(default)
}

impl Settings {
    /// Carga `.env` si está presente (desarrollo local) y luego lee las
    /// variables de entorno, cayendo a defaults razonables para cada una.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            database_url: env_or("DATABASE_URL", "file:./data/botplane.db"),
            database_auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),

            wal_path: env_or("METER_WAL_PATH", "./data/meter.wal"),
            dead_letter_path: env_or("METER_DLQ_PATH", "./data/meter.dlq"),

            meter_batch_size: env_parse_or("METER_BATCH_SIZE", 100usize),
            meter_flush_interval: Duration::from_millis(env_parse_or("METER_FLUSH_INTERVAL_MS", 5_000u64)),
            aggregation_window_ms: env_parse_or("AGGREGATION_WINDOW_MS", 60_000i64),
            aggregation_poll_interval: Duration::from_secs(env_parse_or("AGGREGATION_POLL_INTERVAL_SECONDS", 30u64)),

            heartbeat_timeout: Duration::from_secs(env_parse_or("HEARTBEAT_TIMEOUT_SECONDS", 90u64)),
            liveness_sweep_interval: Duration::from_secs(env_parse_or("LIVENESS_SWEEP_INTERVAL_SECONDS", 15u64)),

            recovery_retry_interval: Duration::from_secs(env_parse_or("RECOVERY_RETRY_INTERVAL_SECONDS", 30u64)),
            recovery_time_cap_hours: env_parse_or("RECOVERY_TIME_CAP_HOURS", 24i64),
            recovery_item_retry_cap: env_parse_or("RECOVERY_ITEM_RETRY_CAP", 5i64),

            notification_max_attempts: env_parse_or("NOTIFICATION_MAX_ATTEMPTS", 3i32),
            notification_backoff_cap_minutes: env_parse_or("NOTIFICATION_BACKOFF_CAP_MINUTES", 100_000i64),
            notification_dispatch_interval: Duration::from_secs(env_parse_or("NOTIFICATION_DISPATCH_INTERVAL_SECONDS", 10u64)),

            autotopup_schedule_poll_interval: Duration::from_secs(env_parse_or("AUTOTOPUP_SCHEDULE_POLL_INTERVAL_SECONDS", 300u64)),

            command_channel_timeout: Duration::from_secs(env_parse_or("COMMAND_CHANNEL_TIMEOUT_SECONDS", 30u64)),

            http_bind_address: env_or("HTTP_BIND_ADDRESS", "0.0.0.0:8080"),

            payment_processor_base_url: env_or("PAYMENT_PROCESSOR_BASE_URL", "https://api.stripe.com"),
            payment_processor_secret_key: env_or("PAYMENT_PROCESSOR_SECRET_KEY", "sk_test_placeholder"),
            payment_webhook_secret: env_or("PAYMENT_WEBHOOK_SECRET", "whsec_placeholder"),

            proxy_admin_base_url: env_or("PROXY_ADMIN_BASE_URL", "http://proxy-admin.internal:9000"),
            proxy_admin_token: env_or("PROXY_ADMIN_TOKEN", "proxy_admin_placeholder"),

            admin_notification_email: env_or("ADMIN_NOTIFICATION_EMAIL", "ops@botplane.dev"),
        }
    }
}
