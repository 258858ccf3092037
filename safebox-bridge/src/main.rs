// SafeBox bridge: native-messaging host that owns the storage connection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use safebox_bridge::{config, host, logging, ConfigStore, ConnectionManager, Connector, HostEvents, Router, WsConnector};
use tracing::{debug, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    logging::init();
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("safebox-bridge {}", VERSION);
                return Ok(());
            }
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            // browsers pass the caller origin (and on some platforms a window handle)
            other => debug!(arg = other, "ignoring argument"),
        }
    }

    let cfg = config::load(config_path.as_deref());
    info!(version = VERSION, mode = %cfg.mode, "starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let store = ConfigStore::new(cfg);
        let (events, event_rx) = HostEvents::channel();
        let connector: Arc<dyn Connector> = Arc::new(WsConnector);
        let manager = ConnectionManager::spawn(store, connector.clone(), events.clone());
        let router = Router::new(manager.clone(), connector, events)?;

        tokio::select! {
            r = host::run(tokio::io::stdin(), tokio::io::stdout(), router, event_rx) => {
                r.context("stdio host")?;
                info!("input closed, shutting down");
            }
            r = shutdown_signal() => {
                r?;
                info!("signal received, shutting down");
            }
        }
        manager.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
