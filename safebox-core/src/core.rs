//! Host-driven API: BridgeCore receives events from the host, returns actions.
//!
//! The core owns the connection state machine, the pending-request tables and the
//! chunk queue. It never performs I/O: the host opens and closes links, sends text
//! frames, fires timers and completes waiters as instructed by the returned actions.
//! Every link gets a generation number; events carrying an older generation are
//! ignored.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::address::{Address, AddressError};
use crate::chunk::{self, ChunkQueue, FileChunk};
use crate::pending::PendingTable;
use crate::protocol::{ClientMessage, ConnectionMode, ServerMessage, DEFAULT_MIME_TYPE};
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::wire::{self, FileFrame};

/// Default time a download may wait for its file frame.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a whole upload may take, first chunk to completion event.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Tunables for the core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Successful result delivered to a waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    File(FileFrame),
    Uploaded { upload_id: String, xorname: String },
}

/// Returned for every accepted upload chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAccepted {
    pub upload_id: String,
    /// True when the envelope waits for the link to open.
    pub queued: bool,
}

/// Action for host to perform.
#[derive(Debug)]
pub enum Action<W> {
    /// Select a target for `mode` and open a link tagged with `generation`.
    Connect {
        generation: u64,
        mode: ConnectionMode,
    },
    /// Drop the current link.
    CloseLink,
    /// Send a JSON text frame on the open link.
    Send(String),
    /// Complete a waiter. Each waiter appears in at most one Resolve.
    Resolve {
        waiter: W,
        outcome: Result<Completion, CoreError>,
    },
    /// Call `on_reconnect_due` after the delay.
    ScheduleReconnect(Duration),
    /// Best-effort user-visible notification.
    Notify { title: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    #[error("no reachable endpoint: {0}")]
    NoReachableEndpoint(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{kind} timed out: {id}")]
    RequestTimeout { kind: &'static str, id: String },
    #[error("decoding error: {0}")]
    Decoding(String),
    #[error("upload rejected: {0}")]
    UploadRejected(String),
    #[error("no pending request for {0}")]
    UnknownCorrelationId(String),
    #[error("replaced by a newer request for the same id")]
    Superseded,
    #[error("connection manager closed")]
    ConnectionClosed,
    #[error("encode error: {0}")]
    Encode(String),
}

/// Main coordinator. Host passes events; core returns actions.
pub struct BridgeCore<W> {
    config: CoreConfig,
    state: LinkState,
    generation: u64,
    active_mode: Option<ConnectionMode>,
    target: Option<String>,
    downloads: PendingTable<W>,
    uploads: PendingTable<W>,
    /// File name -> upload id of the upload currently registered under that name.
    upload_names: HashMap<String, String>,
    queue: ChunkQueue,
    backoff: Backoff,
    /// The in-flight attempt was started by a scheduled reconnect.
    reconnecting: bool,
}

impl<W> BridgeCore<W> {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let backoff = Backoff::new(config.reconnect);
        Self {
            config,
            state: LinkState::Disconnected,
            generation: 0,
            active_mode: None,
            target: None,
            downloads: PendingTable::new(),
            uploads: PendingTable::new(),
            upload_names: HashMap::new(),
            queue: ChunkQueue::new(),
            backoff,
            reconnecting: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_mode(&self) -> Option<ConnectionMode> {
        self.active_mode
    }

    /// URL of the open link, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn retry_delay(&self) -> Duration {
        self.backoff.current()
    }

    pub fn pending_downloads(&self) -> usize {
        self.downloads.len()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn is_download_pending(&self, address: &str) -> bool {
        self.downloads.contains(address)
    }

    pub fn is_upload_pending(&self, upload_id: &str) -> bool {
        self.uploads.contains(upload_id)
    }

    /// Make sure a link for `mode` exists or is being opened.
    /// No-op while Open or Connecting under the same mode; a different mode replaces the link.
    pub fn request_connect(&mut self, mode: ConnectionMode) -> Vec<Action<W>> {
        match self.state {
            LinkState::Open | LinkState::Connecting if self.active_mode == Some(mode) => vec![],
            LinkState::Open | LinkState::Connecting => {
                let mut actions = vec![Action::CloseLink];
                actions.extend(self.begin_connect(mode));
                actions
            }
            LinkState::Disconnected | LinkState::Closing => self.begin_connect(mode),
        }
    }

    /// The target for the active mode changed (port or endpoint list): replace a link that
    /// is open or opening. Nothing to do while disconnected; the next connect picks it up.
    pub fn retarget(&mut self, mode: ConnectionMode) -> Vec<Action<W>> {
        match self.state {
            LinkState::Open | LinkState::Connecting => {
                let mut actions = vec![Action::CloseLink];
                actions.extend(self.begin_connect(mode));
                actions
            }
            LinkState::Disconnected | LinkState::Closing => vec![],
        }
    }

    fn begin_connect(&mut self, mode: ConnectionMode) -> Vec<Action<W>> {
        if self.active_mode != Some(mode) {
            self.backoff.reset();
        }
        self.generation += 1;
        self.state = LinkState::Connecting;
        self.reconnecting = false;
        self.active_mode = Some(mode);
        self.target = None;
        vec![Action::Connect {
            generation: self.generation,
            mode,
        }]
    }

    /// Host opened the link for `generation`: flush queued chunks, then replay pending downloads.
    pub fn on_connected(&mut self, generation: u64, url: &str) -> Vec<Action<W>> {
        if generation != self.generation || self.state != LinkState::Connecting {
            return vec![];
        }
        self.state = LinkState::Open;
        self.target = Some(url.to_string());
        self.reconnecting = false;
        self.backoff.reset();
        let mut actions: Vec<Action<W>> = self.queue.drain().into_iter().map(Action::Send).collect();
        for id in self.downloads.ids() {
            if let Ok(text) = Address::parse(&id)
                .map_err(CoreError::from)
                .and_then(|a| download_frame(&a))
            {
                actions.push(Action::Send(text));
            }
        }
        actions
    }

    /// Host could not open a link for `generation`.
    ///
    /// A failed scheduled reconnect counts as another close: it backs off and retries
    /// while the mode is unchanged, keeping pending work. A failed caller-triggered
    /// attempt is final: everyone waiting on it gets the error.
    pub fn on_connect_failed(
        &mut self,
        generation: u64,
        error: CoreError,
        configured_mode: ConnectionMode,
    ) -> Vec<Action<W>> {
        if generation != self.generation || self.state != LinkState::Connecting {
            return vec![];
        }
        let retrying = std::mem::take(&mut self.reconnecting);
        self.state = LinkState::Disconnected;
        self.target = None;
        let title = match error {
            CoreError::NoReachableEndpoint(_) => "Endpoint Error",
            _ => "Connection Error",
        };
        let mut actions = vec![Action::Notify {
            title: title.to_string(),
            message: error.to_string(),
        }];
        if retrying && self.active_mode == Some(configured_mode) {
            actions.push(Action::ScheduleReconnect(self.backoff.next_delay()));
            return actions;
        }
        self.queue.clear();
        actions.extend(self.fail_all(&error));
        actions
    }

    /// Link for `generation` went away. Reconnects only if it was open and the
    /// configured mode still matches the mode it was opened under.
    pub fn on_link_closed(
        &mut self,
        generation: u64,
        configured_mode: ConnectionMode,
    ) -> Vec<Action<W>> {
        if generation != self.generation {
            return vec![];
        }
        let was_open = match self.state {
            LinkState::Open => true,
            LinkState::Closing => false,
            LinkState::Disconnected | LinkState::Connecting => return vec![],
        };
        self.state = LinkState::Disconnected;
        self.target = None;
        if was_open && self.active_mode == Some(configured_mode) {
            vec![Action::ScheduleReconnect(self.backoff.next_delay())]
        } else {
            self.backoff.reset();
            vec![]
        }
    }

    /// Scheduled reconnect fired.
    pub fn on_reconnect_due(&mut self, configured_mode: ConnectionMode) -> Vec<Action<W>> {
        if self.state != LinkState::Disconnected {
            return vec![];
        }
        let actions = self.request_connect(configured_mode);
        self.reconnecting = true;
        actions
    }

    /// Close the link on purpose (no reconnect). Pending work stays registered.
    pub fn disconnect(&mut self) -> Vec<Action<W>> {
        match self.state {
            LinkState::Open => {
                self.state = LinkState::Closing;
                vec![Action::CloseLink]
            }
            LinkState::Connecting => {
                // abandon the in-flight attempt
                self.generation += 1;
                self.state = LinkState::Disconnected;
                vec![Action::CloseLink]
            }
            LinkState::Disconnected | LinkState::Closing => vec![],
        }
    }

    /// Disconnect and fail everything still pending.
    pub fn shutdown(&mut self) -> Vec<Action<W>> {
        let mut actions = self.disconnect();
        self.queue.clear();
        actions.extend(self.fail_all(&CoreError::ConnectionClosed));
        self.active_mode = None;
        actions
    }

    /// Register a download waiter keyed by the address and send or trigger a connect.
    pub fn download(
        &mut self,
        address: Address,
        waiter: W,
        mode: ConnectionMode,
        now: Instant,
    ) -> Vec<Action<W>> {
        let frame = match download_frame(&address) {
            Ok(f) => f,
            Err(e) => {
                return vec![Action::Resolve {
                    waiter,
                    outcome: Err(e),
                }]
            }
        };
        let mut actions = Vec::new();
        let id = address.as_str().to_string();
        if let Some(old) = self
            .downloads
            .insert(id, waiter, now, self.config.download_timeout)
        {
            actions.push(Action::Resolve {
                waiter: old,
                outcome: Err(CoreError::Superseded),
            });
        }
        if self.state == LinkState::Open {
            actions.push(Action::Send(frame));
        } else {
            actions.extend(self.request_connect(mode));
        }
        actions
    }

    /// Accept one upload chunk. `waiter` is registered only for the first chunk.
    pub fn upload_chunk(
        &mut self,
        mut chunk: FileChunk,
        waiter: Option<W>,
        mode: ConnectionMode,
        now: Instant,
    ) -> Result<(ChunkAccepted, Vec<Action<W>>), CoreError> {
        if chunk.name.is_empty() {
            return Err(CoreError::InvalidChunk("missing file name".into()));
        }
        if chunk.total_chunks == 0 {
            return Err(CoreError::InvalidChunk("total_chunks must be positive".into()));
        }
        if chunk.chunk_index >= chunk.total_chunks {
            return Err(CoreError::InvalidChunk(format!(
                "chunk index {} out of range for {} chunks",
                chunk.chunk_index, chunk.total_chunks
            )));
        }
        if chunk.mime_type.is_empty() {
            chunk.mime_type = DEFAULT_MIME_TYPE.to_string();
        }
        let upload_id = match chunk.upload_id.clone().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None if chunk.is_first() => chunk::mint_upload_id(&chunk.name),
            None => self.upload_names.get(&chunk.name).cloned().ok_or_else(|| {
                CoreError::InvalidChunk(format!("no active upload for {}", chunk.name))
            })?,
        };
        let envelope =
            chunk::chunk_envelope(&chunk, &upload_id).map_err(|e| CoreError::Encode(e.to_string()))?;

        let mut actions = Vec::new();
        if chunk.is_first() {
            self.upload_names
                .insert(chunk.name.clone(), upload_id.clone());
            if let Some(w) = waiter {
                if let Some(old) =
                    self.uploads
                        .insert(upload_id.clone(), w, now, self.config.upload_timeout)
                {
                    actions.push(Action::Resolve {
                        waiter: old,
                        outcome: Err(CoreError::Superseded),
                    });
                }
            }
        }
        let queued = self.state != LinkState::Open;
        if queued {
            self.queue.push(envelope);
            actions.extend(self.request_connect(mode));
        } else {
            actions.push(Action::Send(envelope));
        }
        Ok((ChunkAccepted { upload_id, queued }, actions))
    }

    /// JSON text frame from the link.
    pub fn on_text(&mut self, generation: u64, text: &str) -> Result<Vec<Action<W>>, CoreError> {
        if generation != self.generation {
            return Ok(vec![]);
        }
        let msg = ServerMessage::from_json(text).map_err(|e| CoreError::Decoding(e.to_string()))?;
        let (upload_id, filename, outcome) = match msg {
            ServerMessage::UploadComplete {
                upload_id,
                filename,
                xorname,
            } => (upload_id, filename, Ok(xorname)),
            ServerMessage::UploadError {
                upload_id,
                filename,
                message,
            } => (upload_id, filename, Err(CoreError::UploadRejected(message))),
        };
        let id = upload_id
            .or_else(|| filename.and_then(|f| self.upload_names.get(&f).cloned()))
            .ok_or_else(|| CoreError::UnknownCorrelationId("<no upload id>".into()))?;
        let waiter = self
            .uploads
            .take(&id)
            .ok_or_else(|| CoreError::UnknownCorrelationId(id.clone()))?;
        self.upload_names.retain(|_, v| *v != id);
        let outcome = outcome.map(|xorname| Completion::Uploaded {
            upload_id: id,
            xorname,
        });
        Ok(vec![Action::Resolve { waiter, outcome }])
    }

    /// Binary file frame from the link.
    pub fn on_binary(&mut self, generation: u64, bytes: &[u8]) -> Result<Vec<Action<W>>, CoreError> {
        if generation != self.generation {
            return Ok(vec![]);
        }
        let frame = wire::decode_file_frame(bytes).map_err(|e| CoreError::Decoding(e.to_string()))?;
        let waiter = self
            .downloads
            .take(&frame.xorname)
            .ok_or_else(|| CoreError::UnknownCorrelationId(frame.xorname.clone()))?;
        Ok(vec![Action::Resolve {
            waiter,
            outcome: Ok(Completion::File(frame)),
        }])
    }

    /// Expire overdue requests.
    pub fn tick(&mut self, now: Instant) -> Vec<Action<W>> {
        let mut actions = Vec::new();
        for (id, waiter) in self.downloads.take_expired(now) {
            actions.push(Action::Resolve {
                waiter,
                outcome: Err(CoreError::RequestTimeout {
                    kind: "download",
                    id,
                }),
            });
        }
        for (id, waiter) in self.uploads.take_expired(now) {
            self.upload_names.retain(|_, v| *v != id);
            actions.push(Action::Resolve {
                waiter,
                outcome: Err(CoreError::RequestTimeout { kind: "upload", id }),
            });
        }
        actions
    }

    fn fail_all(&mut self, error: &CoreError) -> Vec<Action<W>> {
        self.upload_names.clear();
        self.downloads
            .take_all()
            .into_iter()
            .chain(self.uploads.take_all())
            .map(|(_, waiter)| Action::Resolve {
                waiter,
                outcome: Err(error.clone()),
            })
            .collect()
    }
}

impl<W> Default for BridgeCore<W> {
    fn default() -> Self {
        Self::new()
    }
}

fn download_frame(address: &Address) -> Result<String, CoreError> {
    ClientMessage::download(address)
        .to_json()
        .map_err(|e| CoreError::Encode(e.to_string()))
}
