// [apps/control-plane/src/state/mod.rs]
/*!
 * =================================================================
 * APARATO: APPLICATION STATE (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: ESTADO COMPARTIDO (ESTRATO L1-APP)
 * RESPONSABILIDAD: HANDLE ÚNICO HACIA TODA LA INFRAESTRUCTURA VIVA
 *
 * Un solo `AppState` barato de clonar (todo detrás de `Arc`) se reparte
 * entre el router de axum y cada bucle de fondo. Nadie más construye
 * sus propias conexiones a libSQL o su propio registro de canal.
 * =================================================================
 */

pub mod node_registry;
pub mod tenant_locks;

use std::sync::Arc;

use botplane_infra_channel::ChannelRegistry;
use botplane_infra_db::{AuditRepository, DbClient, FleetRepository, LedgerRepository, MeteringRepository, NotificationRepository, RecoveryRepository, VaultRepository};
use botplane_infra_metering::MeterEmitter;
use botplane_infra_payments::StripeLikeProcessor;
use botplane_infra_proxy::ReverseProxyClient;

use crate::config::Settings;
use crate::services::{AutoTopupController, MeterAggregator, MeterFlusher, MigrationEngine, NotificationDispatcher, RecoveryManager};

pub use node_registry::NodeRegistry;
pub use tenant_locks::KeyedMutexMap;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,

    pub db: Arc<DbClient>,
    pub ledger: Arc<LedgerRepository>,
    pub fleet_repo: Arc<FleetRepository>,
    pub metering_repo: Arc<MeteringRepository>,
    pub notification_repo: Arc<NotificationRepository>,
    pub recovery_repo: Arc<RecoveryRepository>,
    pub audit_repo: Arc<AuditRepository>,
    pub vault_repo: Arc<VaultRepository>,

    pub node_registry: NodeRegistry,
    pub channel_registry: ChannelRegistry,
    pub meter_emitter: Arc<MeterEmitter>,
    pub payment_processor: Arc<StripeLikeProcessor>,
    pub routing: Arc<ReverseProxyClient>,

    /// Serializa el libro mayor y el indicador de carga en vuelo de
    /// auto-recarga, ambos por tenant.
    pub tenant_locks: KeyedMutexMap,

    pub migration_engine: Arc<MigrationEngine>,
    pub recovery_manager: Arc<RecoveryManager>,
    pub autotopup_controller: Arc<AutoTopupController>,
    pub meter_flusher: Arc<MeterFlusher>,
    pub meter_aggregator: Arc<MeterAggregator>,
    pub notification_dispatcher: Arc<NotificationDispatcher>,
}

impl AppState {
    #[tracing::instrument(skip(settings))]
    pub async fn assemble(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        let db = Arc::new(
            DbClient::connect(&settings.database_url, settings.database_auth_token.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e))
                .context_database_setup()?,
        );

        let fleet_repo = Arc::new(FleetRepository::new(db.clone()));
        let node_registry = NodeRegistry::new(fleet_repo.clone());
        node_registry.hydrate().await.map_err(|e| anyhow::anyhow!(e))?;

        let meter_emitter = Arc::new(
            MeterEmitter::open(&settings.wal_path, &settings.dead_letter_path)
                .await
                .map_err(|e| anyhow::anyhow!(e))?,
        );

        let payment_processor = Arc::new(StripeLikeProcessor::new(
            settings.payment_processor_base_url.clone(),
            settings.payment_processor_secret_key.clone(),
        ));

        let routing = Arc::new(ReverseProxyClient::new(
            settings.proxy_admin_base_url.clone(),
            settings.proxy_admin_token.clone(),
        ));

        let ledger = Arc::new(LedgerRepository::new(db.clone()));
        let metering_repo = Arc::new(MeteringRepository::new(db.clone()));
        let notification_repo = Arc::new(NotificationRepository::new(db.clone()));
        let recovery_repo = Arc::new(RecoveryRepository::new(db.clone()));
        let audit_repo = Arc::new(AuditRepository::new(db.clone()));
        let vault_repo = Arc::new(VaultRepository::new(db.clone()));
        let channel_registry = ChannelRegistry::new();
        let tenant_locks = KeyedMutexMap::new();

        let migration_engine = Arc::new(MigrationEngine::new(
            fleet_repo.clone(),
            notification_repo.clone(),
            node_registry.clone(),
            channel_registry.clone(),
            routing.clone(),
            settings.admin_notification_email.clone(),
        ));

        let recovery_manager = Arc::new(RecoveryManager::new(
            fleet_repo.clone(),
            recovery_repo.clone(),
            notification_repo.clone(),
            node_registry.clone(),
            channel_registry.clone(),
            routing.clone(),
            settings.admin_notification_email.clone(),
            settings.recovery_time_cap_hours,
            settings.recovery_item_retry_cap,
        ));

        let autotopup_controller = Arc::new(AutoTopupController::new(
            ledger.clone(),
            notification_repo.clone(),
            payment_processor.clone(),
            tenant_locks.clone(),
            settings.admin_notification_email.clone(),
        ));

        let meter_flusher = Arc::new(MeterFlusher::new(meter_emitter.clone(), metering_repo.clone(), settings.meter_flush_interval));

        let meter_aggregator = Arc::new(MeterAggregator::new(metering_repo.clone(), settings.aggregation_window_ms, settings.aggregation_poll_interval));

        let notification_dispatcher = Arc::new(NotificationDispatcher::new(
            notification_repo.clone(),
            crate::services::TracingNotificationSender,
            settings.notification_backoff_cap_minutes,
            settings.notification_dispatch_interval,
        ));

        Ok(Self {
            ledger,
            metering_repo,
            notification_repo,
            recovery_repo,
            audit_repo,
            vault_repo,
            fleet_repo,
            db,
            node_registry,
            channel_registry,
            meter_emitter,
            payment_processor,
            routing,
            tenant_locks,
            migration_engine,
            recovery_manager,
            autotopup_controller,
            meter_flusher,
            meter_aggregator,
            notification_dispatcher,
            settings,
        })
    }
}

/// Pequeño adaptador para anotar errores de arranque de infraestructura
/// con `anyhow::Context`, tal como exige la política de errores ambiente
/// (los errores de dominio se propagan verbatim; sólo el arranque usa
/// `anyhow` con contexto).
trait DatabaseSetupContext<T> {
    fn context_database_setup(self) -> anyhow::Result<T>;
}

impl<T> DatabaseSetupContext<T> for anyhow::Result<T> {
    fn context_database_setup(self) -> anyhow::Result<T> {
        use anyhow::Context;
        self.context("failed to establish the control plane's database connection")
    }
}
