// [apps/control-plane/src/bin/seed.rs]
/*!
 * =================================================================
 * APARATO: DEV SEEDER (V1.0)
 * CLASIFICACIÓN: INFRASTRUCTURE UTILITY (ESTRATO L6)
 * RESPONSABILIDAD: POBLAR UNA BASE DE DATOS LOCAL CON DATOS DE ARRANQUE
 *
 * Sólo pensado para desarrollo local contra un archivo libSQL o `:memory:`;
 * usa los mismos repositorios que el plano de control en producción, no
 * SQL crudo por fuera de ellos.
 * =================================================================
 */

use std::sync::Arc;

use botplane_domain_billing::TransactionType;
use botplane_domain_models::{Node, NodeStatus};
use botplane_infra_db::{DbClient, FleetRepository, LedgerRepository};
use botplane_shared_sentinel::init_tracing;
use chrono::Utc;
use tracing::{error, info};

const SEED_NODE_ID: &str = "node-dev-1";
const SEED_TENANT_ID: &str = "tenant-dev-1";
const SEED_SIGNUP_GRANT_CENTS: i64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("botplane_seed");

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "file:./data/botplane.db".to_string());
    let database_auth_token = std::env::var("DATABASE_AUTH_TOKEN").ok();

    let db = match DbClient::connect(&database_url, database_auth_token.as_deref()).await {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(error = %err, "💀 [SEED_FAILED]: could not connect to database");
            return Err(anyhow::anyhow!(err));
        }
    };

    let fleet_repo = FleetRepository::new(db.clone());
    let ledger = LedgerRepository::new(db.clone());

    info!(node_id = SEED_NODE_ID, "🖥️ [SEED]: planting development node");
    let now = Utc::now();
    fleet_repo
        .upsert_node(&Node {
            id: SEED_NODE_ID.to_string(),
            host: "127.0.0.1:9100".to_string(),
            status: NodeStatus::Active,
            capacity_mb: 8192,
            used_mb: 0,
            last_heartbeat_at: now,
            registered_at: now,
        })
        .await?;

    info!(tenant_id = SEED_TENANT_ID, "💰 [SEED]: granting signup credit");
    match ledger
        .credit(
            SEED_TENANT_ID,
            SEED_SIGNUP_GRANT_CENTS,
            TransactionType::SignupGrant,
            Some("development seed grant"),
            Some("seed-signup-grant"),
            None,
            None,
        )
        .await
    {
        Ok(_) => {}
        Err(err) if err.to_string().contains("already recorded") => {
            info!("💰 [SEED]: signup grant already present, skipping");
        }
        Err(err) => return Err(anyhow::anyhow!(err)),
    }

    info!("✅ [SEED_COMPLETE]: development data ready");
    Ok(())
}
