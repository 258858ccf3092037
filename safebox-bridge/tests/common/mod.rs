#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use safebox_bridge::{ConnectionManager, Connector, Inbound, Link, Status, TransportError};
use safebox_core::LinkState;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

pub const HEX: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
pub const LOCAL: &str = "ws://localhost:8081";

#[derive(Debug, Clone)]
pub enum Behavior {
    Open,
    OpenAfter(Duration),
    Refuse,
    Hang,
}

/// Server side of one connect attempt. Registered when the attempt starts, so
/// aborted and refused attempts show up too.
pub struct FakeServer {
    pub url: String,
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<Inbound>,
}

impl FakeServer {
    pub async fn recv_json(&mut self) -> Value {
        let text = self.from_client.recv().await.expect("client frame");
        serde_json::from_str(&text).expect("client sent json")
    }

    /// The client side dropped its sender.
    pub fn is_closed(&mut self) -> bool {
        matches!(self.from_client.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn send_text(&self, v: Value) {
        self.to_client.send(Inbound::Text(v.to_string())).unwrap();
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.to_client.send(Inbound::Binary(bytes)).unwrap();
    }
}

pub struct FakeConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.attempts.lock().unwrap().push(url.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Behavior::Open);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(FakeServer {
            url: url.to_string(),
            from_client: out_rx,
            to_client: in_tx,
        });
        match behavior {
            Behavior::Open => {}
            Behavior::OpenAfter(d) => tokio::time::sleep(d).await,
            Behavior::Refuse => {
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                })
            }
            Behavior::Hang => std::future::pending::<()>().await,
        }
        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub fn fake() -> (Arc<FakeConnector>, mpsc::UnboundedReceiver<FakeServer>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(FakeConnector {
        behaviors: Mutex::new(HashMap::new()),
        attempts: Mutex::new(Vec::new()),
        servers: tx,
    });
    (connector, rx)
}

pub fn as_connector(c: &Arc<FakeConnector>) -> Arc<dyn Connector> {
    c.clone()
}

pub async fn wait_for_state(manager: &ConnectionManager, state: LinkState) -> Status {
    for _ in 0..1000 {
        let status = manager.status().await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("manager never reached {state:?}");
}
