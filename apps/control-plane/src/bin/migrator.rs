// [apps/control-plane/src/bin/migrator.rs]
/*!
 * =================================================================
 * APARATO: DB MIGRATOR CLI (V1.0)
 * CLASIFICACIÓN: OPS INFRASTRUCTURE (ESTRATO L6)
 * RESPONSABILIDAD: APLICAR EL ESQUEMA DE FORMA IDEMPOTENTE FUERA DEL ARRANQUE
 *
 * `DbClient::connect` ya aplica el esquema completo al conectar; este
 * binario sólo existe para que un pipeline de despliegue pueda nivelar
 * la base de datos sin levantar el servidor HTTP.
 * =================================================================
 */

use botplane_infra_db::DbClient;
use botplane_shared_sentinel::init_tracing;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("botplane_migrator");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "file:./data/botplane.db".to_string());
        let database_auth_token = std::env::var("DATABASE_AUTH_TOKEN").ok();

        info!(database_url, "🛠️ [MIGRATOR]: applying schema");
        match DbClient::connect(&database_url, database_auth_token.as_deref()).await {
            Ok(_) => {
                info!("✅ [MIGRATOR_SUCCESS]: schema is up to date");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "💀 [MIGRATOR_FAILED]");
                std::process::exit(1);
            }
        }
    })
}
