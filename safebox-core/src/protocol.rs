//! Bridge wire protocol: JSON text frames exchanged with the storage client or relay.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Default loopback port of the local companion client.
pub const DEFAULT_LOCAL_PORT: u16 = 8081;

/// MIME type used when the far end does not name one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Which kind of target the single transport connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Companion process on this machine.
    #[default]
    Local,
    /// Best of several remote relay endpoints.
    Endpoints,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Local => f.write_str("local"),
            ConnectionMode::Endpoints => f.write_str("endpoints"),
        }
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConnectionMode::Local),
            "endpoints" => Ok(ConnectionMode::Endpoints),
            other => Err(format!("unknown connection mode: {other}")),
        }
    }
}

/// Loopback WebSocket URL for local mode.
pub fn local_url(port: u16) -> String {
    format!("ws://localhost:{port}")
}

/// Per-chunk metadata carried in an upload envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub filename: String,
    pub mime_type: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub upload_id: String,
}

/// Frames sent to the storage side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Download { address: Address },
    /// `payload` is base64 of the chunk bytes.
    UploadChunk {
        metadata: ChunkMetadata,
        payload: String,
    },
}

/// JSON frames received from the storage side. File data arrives as binary frames (see `wire`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    UploadComplete {
        #[serde(default)]
        upload_id: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        xorname: String,
    },
    #[serde(rename_all = "camelCase")]
    UploadError {
        #[serde(default)]
        upload_id: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        message: String,
    },
}

impl ClientMessage {
    pub fn download(address: &Address) -> Self {
        ClientMessage::Download {
            address: address.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
