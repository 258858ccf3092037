//! Transport selector: pick the URL the single link should target and open it.
//!
//! Local mode connects straight to the loopback port. Endpoints mode races every
//! candidate at once; the first to open wins and every other attempt is aborted
//! (closing any socket it had opened) before the selector returns.

use std::sync::Arc;
use std::time::Duration;

use safebox_core::protocol::local_url;
use safebox_core::ConnectionMode;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::{Config, ConfigStore};
use crate::transport::{Connector, Link, TransportError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectError {
    #[error("no endpoint URLs configured")]
    NoEndpoints,
    #[error("none of {0} endpoint(s) could connect")]
    NoneReachable(usize),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Open a link for `mode` using `config`. Returns the URL that was opened.
pub async fn select(
    mode: ConnectionMode,
    config: &Config,
    connector: Arc<dyn Connector>,
) -> Result<(String, Link), SelectError> {
    match mode {
        ConnectionMode::Local => {
            let url = local_url(config.local_port);
            let link = connector.connect(&url).await?;
            Ok((url, link))
        }
        ConnectionMode::Endpoints => {
            race(&config.endpoints, config.candidate_timeout(), connector).await
        }
    }
}

/// Like `select`, but in endpoints mode an empty candidate list is first filled from
/// `default_endpoints` and written back to the store.
pub async fn select_with_store(
    mode: ConnectionMode,
    store: &ConfigStore,
    connector: Arc<dyn Connector>,
) -> Result<(String, Link), SelectError> {
    let mut config = store.current();
    if mode == ConnectionMode::Endpoints
        && config.endpoints.is_empty()
        && !config.default_endpoints.is_empty()
    {
        info!(
            count = config.default_endpoints.len(),
            "no endpoints configured, storing defaults"
        );
        let defaults = config.default_endpoints.clone();
        store.update(|c| c.endpoints = defaults.clone());
        config.endpoints = defaults;
    }
    select(mode, &config, connector).await
}

/// Race all `candidates`; first to open within `per_candidate` wins.
pub async fn race(
    candidates: &[String],
    per_candidate: Duration,
    connector: Arc<dyn Connector>,
) -> Result<(String, Link), SelectError> {
    if candidates.is_empty() {
        return Err(SelectError::NoEndpoints);
    }
    let mut attempts = JoinSet::new();
    for url in candidates {
        let url = url.clone();
        let connector = connector.clone();
        attempts.spawn(async move {
            let result = match tokio::time::timeout(per_candidate, connector.connect(&url)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout(url.clone())),
            };
            (url, result)
        });
    }
    let mut winner = None;
    while let Some(joined) = attempts.join_next().await {
        match joined {
            Ok((url, Ok(link))) => {
                winner = Some((url, link));
                break;
            }
            Ok((url, Err(e))) => debug!(%url, "candidate failed: {e}"),
            Err(e) => debug!("candidate task failed: {e}"),
        }
    }
    // losers are aborted and awaited so their sockets are gone before we return
    attempts.shutdown().await;
    match winner {
        Some((url, link)) => {
            info!(%url, "endpoint selected");
            Ok((url, link))
        }
        None => Err(SelectError::NoneReachable(candidates.len())),
    }
}
