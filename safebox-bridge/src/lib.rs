//! SafeBox bridge: tokio host around `safebox-core`.
//!
//! Owns the single storage link, races relay endpoints, routes caller requests and
//! speaks native messaging on stdio.

pub mod config;
pub mod error;
pub mod helper;
pub mod host;
pub mod logging;
pub mod manager;
pub mod notify;
pub mod router;
pub mod selector;
pub mod transport;

pub use config::{Config, ConfigStore};
pub use error::BridgeError;
pub use manager::{ChunkReceipt, ConnectionManager, Status, UploadCompletion};
pub use notify::{HostEvent, HostEvents};
pub use router::{Request, Router};
pub use transport::{Connector, Inbound, Link, TransportError, WsConnector};
