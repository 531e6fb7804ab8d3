use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod convert;
mod error;
mod handler;
mod manager;
mod media;
mod telemetry;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("hyper", log::LevelFilter::Warn)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = Arc::new(config::ServerConfig::load()?);
    log::info!(
        "Artifacts: live={} record={} converted={}",
        config.live_root.display(),
        config.record_root.display(),
        config.converted_root.display()
    );

    let cancel = CancellationToken::new();
    let registry = manager::StreamRegistry::new(Arc::clone(&config), cancel.clone());
    let jobs = convert::ConversionJobs::new(Arc::clone(&config));
    let throughput = telemetry::start_telemetry(registry.clone(), cancel.clone());

    let state = handler::AppState::new(registry.clone(), jobs, throughput);
    let server = api::start_api_server(state, cancel.clone()).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, shutting down");
                cancel.cancel();
            },
        }
    }

    if let Err(e) = server.await {
        log::error!("API server task: {}", e);
    }
    // every feeder observes the token; wait for the codecs to wind down
    let pipes = registry.snapshot().await;
    futures::future::join_all(pipes.iter().map(|pipe| pipe.closed())).await;
    log::info!("Stopped");
    Ok(())
}
