//! Stdio host using browser native-messaging framing: u32 little-endian length + UTF-8 JSON.
//!
//! Each request is handled on its own task; a single writer task owns the output so
//! replies and host events never interleave.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::notify::HostEvent;
use crate::router::Router;

/// Upper bound on one message in either direction.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// How long replies still in flight may take once input has closed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("stdio: {0}")]
    Io(#[from] std::io::Error),
    #[error("message of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("bad json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one message. `Ok(None)` on clean EOF before a length prefix.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Value>, HostError> {
    match read_frame(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
        None => Ok(None),
    }
}

/// Read one frame body without parsing it.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, HostError> {
    let len = match reader.read_u32_le().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_MESSAGE_LEN {
        return Err(HostError::TooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> Result<(), HostError> {
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(HostError::TooLarge(bytes.len()));
    }
    writer.write_u32_le(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reply envelope: `{id, response}`, `id` omitted when the request had none.
pub fn reply(id: Option<Value>, response: Value) -> Value {
    match id {
        Some(id) => json!({ "id": id, "response": response }),
        None => json!({ "response": response }),
    }
}

/// Serve requests from `reader` until EOF. Host events are written alongside replies.
///
/// A frame that is not valid JSON gets a failure reply and the loop goes on; only I/O
/// errors and oversized frames end it. On EOF, replies still in flight are written
/// before returning, bounded by a short timeout.
pub async fn run<R, W>(
    mut reader: R,
    writer: W,
    router: Router,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
) -> Result<(), HostError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        loop {
            let value = tokio::select! {
                value = out_rx.recv() => match value {
                    Some(v) => v,
                    None => break,
                },
                Some(event) = events.recv() => match serde_json::to_value(&event) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("host event not serializable: {e}");
                        continue;
                    }
                },
            };
            if let Err(e) = write_message(&mut writer, &value).await {
                warn!("write to host failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    });

    let result = loop {
        let body = match read_frame(&mut reader).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                debug!("host closed input");
                break Ok(());
            }
            Err(e) => break Err(e),
        };
        let mut value: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(len = body.len(), "unparseable message: {e}");
                let _ = out_tx.send(reply(
                    None,
                    json!({ "success": false, "error": format!("invalid request: {e}") }),
                ));
                continue;
            }
        };
        let id = value.as_object_mut().and_then(|m| m.remove("id"));
        let router = router.clone();
        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = router.handle_value(value).await {
                let _ = out.send(reply(id, response));
            }
        });
    };

    drop(out_tx);
    if result.is_err() {
        writer_task.abort();
        return result;
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(written)) => written,
        Ok(Err(e)) => {
            warn!("host writer task failed: {e}");
            Ok(())
        }
        Err(_) => {
            warn!("replies still pending at shutdown were dropped");
            Ok(())
        }
    }
}
