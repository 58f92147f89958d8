// [apps/control-plane/src/main.rs]
/*!
 * =================================================================
 * APARATO: CONTROL PLANE MAIN ENTRY POINT (V1.0 - GENESIS)
 * CLASIFICACIÓN: APPLICATION SHELL (ESTRATO L3)
 * RESPONSABILIDAD: BOOTSTRAP DE OBSERVABILIDAD E IGNICIÓN DEL KERNEL
 * =================================================================
 */

use botplane_control_plane::{ControlPlaneKernel, Settings};
use botplane_shared_sentinel::init_tracing;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().thread_stack_size(4 * 1024 * 1024).build()?;

    runtime.block_on(async {
        init_tracing("botplane_control_plane");
        info!("🛰️ [CONTROL_PLANE]: ignition sequence starting");

        let settings = Settings::load();
        let kernel = match ControlPlaneKernel::ignite(settings).await {
            Ok(kernel) => kernel,
            Err(err) => {
                error!(error = %err, "💀 [IGNITION_FAILED]: control plane could not assemble its state");
                std::process::exit(1);
            }
        };

        if let Err(err) = kernel.launch().await {
            error!(error = %err, "💀 [KERNEL_COLLAPSE]: runtime failure");
            std::process::exit(1);
        }

        Ok(())
    })
}
