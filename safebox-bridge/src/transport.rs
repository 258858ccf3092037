//! Link to the storage side: a WebSocket carrying JSON text frames out and text or binary frames in.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Something received on a link. The inbound channel ending means the link closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Socket-level error; the link closes right after.
    Error(String),
}

/// An open link. Dropping `outbound` closes the socket.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connect to {0} timed out")]
    Timeout(String),
}

/// Opens links. The manager and selector only see this seam, so tests can swap in fakes.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// Real WebSocket connector.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        let writer_url = url.to_string();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(url = %writer_url, "send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!(url = %writer_url, "writer finished");
        });

        let reader_url = url.to_string();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let inbound = match msg {
                    Ok(Message::Text(t)) => Inbound::Text(t),
                    Ok(Message::Binary(b)) => Inbound::Binary(b),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Inbound::Error(e.to_string()));
                        break;
                    }
                };
                if in_tx.send(inbound).is_err() {
                    break;
                }
            }
            debug!(url = %reader_url, "reader finished");
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
