//! Binary file frames (4 bytes BE metadata length + JSON metadata + raw bytes) and base64 helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_MIME_TYPE;

const LEN_SIZE: usize = 4;
const MAX_METADATA_LEN: u32 = 64 * 1024; // 64 KiB

/// Metadata block at the front of a file frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub xorname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A decoded file frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFrame {
    pub xorname: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileFrame {
    /// `data:<mime>;base64,<data>` for display layers.
    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.data)
    }
}

/// Encode a file frame. Used by test doubles and companion tooling.
pub fn encode_file_frame(meta: &FileMetadata, data: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    let meta_bytes = serde_json::to_vec(meta).map_err(FrameEncodeError::Encode)?;
    let len = u32::try_from(meta_bytes.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_METADATA_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + meta_bytes.len() + data.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&meta_bytes);
    out.extend_from_slice(data);
    Ok(out)
}

/// Error encoding a file frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("metadata too large")]
    TooLarge,
}

/// Decode one complete binary message. Everything after the metadata block is file data.
pub fn decode_file_frame(bytes: &[u8]) -> Result<FileFrame, FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::Truncated);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_METADATA_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let end = LEN_SIZE + len as usize;
    if bytes.len() < end {
        return Err(FrameDecodeError::Truncated);
    }
    let meta: FileMetadata =
        serde_json::from_slice(&bytes[LEN_SIZE..end]).map_err(FrameDecodeError::Metadata)?;
    Ok(FileFrame {
        xorname: meta.xorname,
        mime_type: meta
            .mime_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        data: bytes[end..].to_vec(),
    })
}

/// Error decoding a file frame or base64 payload.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame truncated")]
    Truncated,
    #[error("metadata too large")]
    TooLarge,
    #[error("bad metadata: {0}")]
    Metadata(#[source] serde_json::Error),
    #[error("bad base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("not a base64 data url")]
    NotDataUrl,
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, FrameDecodeError> {
    Ok(STANDARD.decode(text)?)
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, encode_base64(bytes))
}

/// Split a `data:<mime>;base64,<data>` URL back into MIME type and bytes.
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>), FrameDecodeError> {
    let rest = url.strip_prefix("data:").ok_or(FrameDecodeError::NotDataUrl)?;
    let (head, data) = rest.split_once(',').ok_or(FrameDecodeError::NotDataUrl)?;
    let mime = head
        .strip_suffix(";base64")
        .ok_or(FrameDecodeError::NotDataUrl)?;
    Ok((mime.to_string(), decode_base64(data)?))
}
