//! Helper-port discovery and browse URL resolution.
//!
//! The companion client serves content over HTTP on a helper port it reports at
//! `http://127.0.0.1:<local_port><helper_path>` as `{"port": N}`.

use std::sync::Arc;
use std::time::Duration;

use safebox_core::{Address, ConnectionMode, CoreError};
use serde::Deserialize;
use tracing::debug;

use crate::config::ConfigStore;
use crate::error::BridgeError;
use crate::selector;
use crate::transport::Connector;

const HELPER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct HelperPort {
    port: u16,
}

#[derive(Debug, Clone)]
pub struct HelperClient {
    http: reqwest::Client,
    helper_path: String,
}

impl HelperClient {
    pub fn new(helper_path: &str) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder().timeout(HELPER_TIMEOUT).build()?;
        let helper_path = if helper_path.starts_with('/') {
            helper_path.to_string()
        } else {
            format!("/{helper_path}")
        };
        Ok(Self { http, helper_path })
    }

    pub fn helper_url(&self, local_port: u16) -> String {
        format!("http://127.0.0.1:{}{}", local_port, self.helper_path)
    }

    /// Ask the companion on `local_port` for its helper port.
    pub async fn fetch_port(&self, local_port: u16) -> Result<u16, BridgeError> {
        let url = self.helper_url(local_port);
        debug!(%url, "fetching helper port");
        let body: HelperPort = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.port)
    }
}

/// `http://127.0.0.1:<port>/<address>`
pub fn local_browse_url(helper_port: u16, address: &Address) -> String {
    format!("http://127.0.0.1:{}/{}", helper_port, address)
}

/// HTTP(S) origin serving the same host as a relay WebSocket URL: ws→http, wss→https.
pub fn endpoint_origin(ws_url: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(ws_url).ok()?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Turn a typed address into a URL a browser tab can open.
///
/// Local mode goes through the helper port; endpoints mode races the relays and uses
/// the winner's origin. The selected link is dropped right away.
pub async fn resolve_browse_url(
    input: &str,
    store: &ConfigStore,
    helper: &HelperClient,
    connector: Arc<dyn Connector>,
) -> Result<String, BridgeError> {
    let address = Address::parse(input.trim())?;
    let config = store.current();
    match config.mode {
        ConnectionMode::Local => {
            let port = helper.fetch_port(config.local_port).await?;
            Ok(local_browse_url(port, &address))
        }
        ConnectionMode::Endpoints => {
            let (url, _link) = selector::select_with_store(ConnectionMode::Endpoints, store, connector)
                .await
                .map_err(|e| CoreError::NoReachableEndpoint(e.to_string()))?;
            let origin = endpoint_origin(&url).ok_or_else(|| {
                CoreError::NoReachableEndpoint(format!("{url} has no HTTP origin"))
            })?;
            Ok(format!("{}/{}", origin, address))
        }
    }
}
