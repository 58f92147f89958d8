// [apps/control-plane/src/kernel.rs]
/*!
 * =================================================================
 * APARATO: CONTROL PLANE KERNEL (V1.0 - GENESIS)
 * CLASIFICACIÓN: COMPOSITION ROOT (ESTRATO L1-APP)
 * RESPONSABILIDAD: IGNICIÓN DE INFRAESTRUCTURA Y BUCLES DE FONDO
 *
 * `ignite` sólo construye `AppState` (la conexión a libSQL ya aplica su
 * propio esquema al conectar). `launch` levanta los seis bucles de
 * fondo del plano de control sobre una sola señal de apagado
 * `tokio::sync::watch<bool>` clonada hacia cada uno, y sólo entonces
 * sirve el router HTTP/WebSocket.
 * =================================================================
 */

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::routes::create_control_plane_router;
use crate::services::LivenessSweeper;
use crate::state::AppState;
use crate::Settings;

pub struct ControlPlaneKernel {
    pub bind_address: String,
    pub application_state: AppState,
}

impl ControlPlaneKernel {
    #[tracing::instrument(skip(settings))]
    pub async fn ignite(settings: Settings) -> anyhow::Result<Self> {
        let bind_address = settings.http_bind_address.clone();
        let application_state = AppState::assemble(settings).await?;
        Ok(Self { bind_address, application_state })
    }

    pub async fn launch(self) -> anyhow::Result<()> {
        let Self { bind_address, application_state: state } = self;
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        recover_meter_wal(&state).await;

        let liveness_sweeper = Arc::new(LivenessSweeper::new(
            state.node_registry.clone(),
            state.recovery_manager.clone(),
            state.settings.heartbeat_timeout,
            state.settings.liveness_sweep_interval,
        ));

        tokio::spawn(state.meter_flusher.clone().run(shutdown_receiver.clone()));
        tokio::spawn(state.meter_aggregator.clone().run(shutdown_receiver.clone()));
        tokio::spawn(state.notification_dispatcher.clone().run(shutdown_receiver.clone()));
        tokio::spawn(
            state
                .autotopup_controller
                .clone()
                .run(state.settings.autotopup_schedule_poll_interval, shutdown_receiver.clone()),
        );
        tokio::spawn(
            state
                .recovery_manager
                .clone()
                .run(state.settings.recovery_retry_interval, shutdown_receiver.clone()),
        );
        tokio::spawn(liveness_sweeper.run(shutdown_receiver.clone()));

        let router = create_control_plane_router(state.clone());
        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(bind_address = %bind_address, "🚀 [KERNEL_ONLINE]: control plane listening");

        axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown_signal(shutdown_sender)).await?;

        Ok(())
    }
}

/// Repone en el emisor de eventos lo que quedó varado en el WAL de
/// medición antes de arrancar el primer ciclo de vaciado regular.
async fn recover_meter_wal(state: &AppState) {
    match state.meter_flusher.recover_from_wal().await {
        Ok(replayed) if replayed > 0 => info!(replayed, "📼 [METER_WAL_RECOVERED]: re-queued events from a previous crash"),
        Ok(_) => {}
        Err(err) => error!(error = %err, "📼 [METER_WAL_RECOVERY_FAILED]"),
    }
}

/// Espera Ctrl+C (o SIGTERM en Unix) y entonces difunde `true` por la
/// señal de apagado compartida, dejando que cada bucle de fondo termine
/// su iteración actual antes de morir.
async fn wait_for_shutdown_signal(shutdown_sender: watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("🛑 [KERNEL_SHUTDOWN]: shutdown signal received, draining background loops");
    let _ = shutdown_sender.send(true);
}
