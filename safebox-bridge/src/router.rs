//! Caller-facing request router: JSON requests tagged by `action` in, JSON replies out.

use std::sync::Arc;

use safebox_core::wire::{decode_base64, encode_base64, parse_data_url};
use safebox_core::{ConnectionMode, FileChunk};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{sanitize_endpoints, Config};
use crate::error::BridgeError;
use crate::helper::{self, HelperClient};
use crate::manager::ConnectionManager;
use crate::notify::HostEvents;
use crate::transport::Connector;

const ACTIONS: &[&str] = &[
    "download",
    "downloadAsDataUrl",
    "uploadChunk",
    "getLocalPort",
    "fetchRemoteHelperPort",
    "openAndClose",
    "resolveAddress",
    "getConfig",
    "setConfig",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Download {
        #[serde(alias = "xorname")]
        address: String,
    },
    DownloadAsDataUrl {
        #[serde(alias = "xorname")]
        address: String,
    },
    #[serde(rename_all = "camelCase")]
    UploadChunk { file_chunk: ChunkRequest },
    GetLocalPort,
    #[serde(rename_all = "camelCase")]
    FetchRemoteHelperPort {
        #[serde(default)]
        local_port: Option<u16>,
    },
    OpenAndClose { url: String },
    ResolveAddress {
        #[serde(alias = "xorname")]
        address: String,
    },
    GetConfig,
    /// Settings view: only the fields present are changed.
    #[serde(rename_all = "camelCase")]
    SetConfig {
        #[serde(default)]
        mode: Option<ConnectionMode>,
        #[serde(default)]
        endpoints: Option<Vec<String>>,
        #[serde(default)]
        local_port: Option<u16>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: ChunkData,
    #[serde(default)]
    pub upload_id: Option<String>,
}

/// Chunk bytes as a JSON byte array, a base64 string or a base64 data URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ChunkData {
    Bytes(Vec<u8>),
    Text(String),
}

impl ChunkData {
    fn into_bytes(self) -> Result<Vec<u8>, BridgeError> {
        match self {
            ChunkData::Bytes(b) => Ok(b),
            ChunkData::Text(t) if t.starts_with("data:") => parse_data_url(&t)
                .map(|(_, bytes)| bytes)
                .map_err(|e| BridgeError::InvalidRequest(e.to_string())),
            ChunkData::Text(t) => {
                decode_base64(&t).map_err(|e| BridgeError::InvalidRequest(e.to_string()))
            }
        }
    }
}

impl ChunkRequest {
    fn into_chunk(self) -> Result<FileChunk, BridgeError> {
        let mime_type = self
            .mime_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| safebox_core::protocol::DEFAULT_MIME_TYPE.to_string());
        Ok(FileChunk {
            upload_id: self.upload_id.filter(|id| !id.is_empty()),
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            name: self.name,
            mime_type,
            data: self.data.into_bytes()?,
        })
    }
}

#[derive(Clone)]
pub struct Router {
    manager: ConnectionManager,
    helper: HelperClient,
    connector: Arc<dyn Connector>,
    events: HostEvents,
}

impl Router {
    pub fn new(
        manager: ConnectionManager,
        connector: Arc<dyn Connector>,
        events: HostEvents,
    ) -> Result<Self, BridgeError> {
        let helper = HelperClient::new(&manager.config().current().helper_path)?;
        Ok(Self {
            manager,
            helper,
            connector,
            events,
        })
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Handle a raw JSON request. `None` means the action has no reply.
    pub async fn handle_value(&self, value: Value) -> Option<Value> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => match action.as_deref() {
                Some(a) if ACTIONS.contains(&a) => {
                    debug!(action = a, "malformed request: {e}");
                    Some(failure(format!("invalid request: {e}")))
                }
                other => {
                    debug!(action = ?other, "unknown request");
                    Some(failure("unknown request"))
                }
            },
        }
    }

    pub async fn handle(&self, request: Request) -> Option<Value> {
        match request {
            Request::Download { address } => Some(match self.manager.download(&address).await {
                Ok(frame) => json!({
                    "success": true,
                    "payload": encode_base64(&frame.data),
                    "mimeType": frame.mime_type,
                }),
                Err(e) => failure(e),
            }),
            Request::DownloadAsDataUrl { address } => {
                Some(match self.manager.download_data_url(&address).await {
                    Ok(url) => json!({ "success": true, "url": url }),
                    Err(e) => failure(e),
                })
            }
            Request::UploadChunk { file_chunk } => Some(match self.upload_chunk(file_chunk).await {
                Ok(v) => v,
                Err(e) => failure(e),
            }),
            Request::GetLocalPort => {
                Some(json!({ "port": self.manager.config().current().local_port }))
            }
            Request::FetchRemoteHelperPort { local_port } => {
                let port = local_port.unwrap_or_else(|| self.manager.config().current().local_port);
                Some(match self.helper.fetch_port(port).await {
                    Ok(port) => json!({ "success": true, "port": port }),
                    Err(e) => failure(e),
                })
            }
            Request::OpenAndClose { url } => {
                self.events.open_tab(&url, true);
                None
            }
            Request::GetConfig => Some(settings(&self.manager.config().current())),
            Request::SetConfig {
                mode,
                endpoints,
                local_port,
            } => Some(match self.set_config(mode, endpoints, local_port) {
                Ok(v) => v,
                Err(e) => failure(e),
            }),
            Request::ResolveAddress { address } => {
                let resolved = helper::resolve_browse_url(
                    &address,
                    self.manager.config(),
                    &self.helper,
                    self.connector.clone(),
                )
                .await;
                Some(match resolved {
                    Ok(url) => json!({ "success": true, "url": url }),
                    Err(e) => {
                        let title = if e.is_invalid_input() {
                            "Invalid Address"
                        } else {
                            "Connection Error"
                        };
                        self.events.notify(title, &e.to_string());
                        failure(e)
                    }
                })
            }
        }
    }

    fn set_config(
        &self,
        mode: Option<ConnectionMode>,
        endpoints: Option<Vec<String>>,
        local_port: Option<u16>,
    ) -> Result<Value, BridgeError> {
        if local_port == Some(0) {
            return Err(BridgeError::InvalidRequest("local port must be non-zero".into()));
        }
        let endpoints = endpoints.map(sanitize_endpoints);
        let store = self.manager.config();
        store.update(|c| {
            if let Some(m) = mode {
                c.mode = m;
            }
            if let Some(list) = endpoints {
                c.endpoints = list;
            }
            if let Some(p) = local_port {
                c.local_port = p;
            }
        });
        let config = store.current();
        info!(mode = %config.mode, endpoints = config.endpoints.len(), port = config.local_port, "settings updated");
        Ok(json!({ "success": true, "config": settings(&config) }))
    }

    async fn upload_chunk(&self, request: ChunkRequest) -> Result<Value, BridgeError> {
        let chunk = request.into_chunk()?;
        let receipt = self.manager.upload_chunk(chunk).await?;
        match receipt.completion {
            Some(completion) => {
                let xorname = completion.wait().await?;
                Ok(json!({
                    "success": true,
                    "xorname": xorname,
                    "uploadId": receipt.upload_id,
                }))
            }
            None => Ok(json!({
                "success": true,
                "uploadId": receipt.upload_id,
                "queued": receipt.queued,
            })),
        }
    }
}

fn settings(config: &Config) -> Value {
    json!({
        "mode": config.mode,
        "endpoints": config.endpoints,
        "localPort": config.local_port,
    })
}

fn failure(e: impl ToString) -> Value {
    let error = e.to_string();
    warn!("request failed: {error}");
    json!({ "success": false, "error": error })
}
