//! Upload chunking: split a file, mint upload ids, build envelopes, queue them while offline.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::{ChunkMetadata, ClientMessage};
use crate::wire;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// One slice of a file handed to the bridge by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Absent on the first chunk means "mint one".
    pub upload_id: Option<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileChunk {
    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }
}

/// Split `data` into byte ranges of `chunk_size`. An empty file yields a single empty range.
pub fn split_ranges(total_len: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    if total_len == 0 {
        return vec![(0, 0)];
    }
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < total_len {
        let end = (start + size).min(total_len);
        out.push((start, end));
        start = end;
    }
    out
}

/// Split a whole file into caller chunks. The first chunk carries `upload_id` (possibly none).
pub fn split_file(
    name: &str,
    mime_type: &str,
    data: &[u8],
    chunk_size: usize,
) -> Vec<FileChunk> {
    let ranges = split_ranges(data.len(), chunk_size);
    let total = ranges.len() as u32;
    ranges
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| FileChunk {
            upload_id: None,
            chunk_index: i as u32,
            total_chunks: total,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data: data[start..end].to_vec(),
        })
        .collect()
}

/// Mint an upload id: `<name>-<unix millis>-<8 hex>`.
pub fn mint_upload_id(name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", name, millis, &suffix[..8])
}

/// Build the JSON text frame for one chunk.
pub fn chunk_envelope(chunk: &FileChunk, upload_id: &str) -> Result<String, serde_json::Error> {
    ClientMessage::UploadChunk {
        metadata: ChunkMetadata {
            filename: chunk.name.clone(),
            mime_type: chunk.mime_type.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            upload_id: upload_id.to_string(),
        },
        payload: wire::encode_base64(&chunk.data),
    }
    .to_json()
}

/// Envelopes waiting for the transport to open. FIFO; entries are never modified.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    items: VecDeque<String>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: String) {
        self.items.push_back(envelope);
    }

    /// Take everything in insertion order.
    pub fn drain(&mut self) -> Vec<String> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
