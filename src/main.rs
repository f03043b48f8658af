use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use abacus::config::ServerConfig;
use abacus::manager::{self, SystemProfile};
use abacus::server::AbacusServer;
use abacus::AbacusDb;
use tracing::{error, info};

fn main() -> ExitCode {
    let config = ServerConfig::load();
    config.init_logging();

    let profile = SystemProfile::detect().with_durability(config.strict_durability);
    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        durability = if profile.strict_durability { "strict (fsync)" } else { "high throughput (async)" },
        "Resource profile"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(config, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Calculator microservice stopped");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(config: ServerConfig, profile: SystemProfile) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.data_dir)?;

    // No degraded mode: without the store there is nothing to serve.
    let db = Arc::new(AbacusDb::open(&config.log_path(), profile.strict_durability)?);

    if let Some(interval) = config.compaction_interval() {
        manager::start_compaction_thread(db.clone(), interval);
    }

    let server = AbacusServer::new(db);
    server.run(config.addr, shutdown_signal()).await?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
