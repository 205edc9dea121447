use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use cancelq::api::{serve, AppState};
use cancelq::engine::{
    CancellationService, ConvergenceMonitor, LogEscalationSink, PropagationEngine,
};
use cancelq::protocol::AgentProtocol;
use cancelq::storage::{CancellationLedger, ElementStore, InMemoryStore, PostgresStore};
use cancelq::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    let (elements, ledger) = open_stores(&config).await?;

    let propagation = PropagationEngine::new(elements.clone(), config.propagation.clone());
    let state = AppState {
        elements: elements.clone(),
        cancellation: CancellationService::new(
            elements.clone(),
            ledger.clone(),
            propagation.clone(),
        ),
        agents: AgentProtocol::new(elements.clone(), ledger.clone(), config.protocol.clone()),
    };
    let monitor = ConvergenceMonitor::new(
        elements,
        ledger,
        propagation,
        Arc::new(LogEscalationSink),
        config.monitor.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_shutdown = shutdown_rx.clone();
    let monitor_handle = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    serve(state, config.api_port, shutdown_rx).await?;
    monitor_handle.await?;

    Ok(())
}

async fn open_stores(
    config: &Config,
) -> Result<(Arc<dyn ElementStore>, Arc<dyn CancellationLedger>)> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(PostgresStore::new(url, config.max_connections).await?);
            store.run_migrations().await?;
            log::info!("Using Postgres store");
            let elements: Arc<dyn ElementStore> = store.clone();
            let ledger: Arc<dyn CancellationLedger> = store;
            Ok((elements, ledger))
        }
        None => {
            log::warn!("DATABASE_URL not set; state is in memory and lost on exit");
            let store = Arc::new(InMemoryStore::new());
            let elements: Arc<dyn ElementStore> = store.clone();
            let ledger: Arc<dyn CancellationLedger> = store;
            Ok((elements, ledger))
        }
    }
}
