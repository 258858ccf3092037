//! Connection manager: one event-loop task owns the core, the link and all pending work.
//!
//! Callers talk to the loop through a command channel and get their results on
//! per-request oneshot channels. Link events, selector results, reconnect timers and
//! configuration changes arrive on the same loop, so state is never shared.

use std::sync::Arc;
use std::time::Duration;

use safebox_core::chunk::split_file;
use safebox_core::{
    Action, Address, BridgeCore, ChunkAccepted, Completion, ConnectionMode, CoreError, FileChunk,
    FileFrame, LinkState,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigStore};
use crate::error::BridgeError;
use crate::notify::HostEvents;
use crate::selector::{self, SelectError};
use crate::transport::{Connector, Inbound, Link};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

type Waiter = oneshot::Sender<Result<Completion, CoreError>>;

enum Command {
    Download {
        address: Address,
        reply: Waiter,
    },
    UploadChunk {
        chunk: FileChunk,
        completion: Option<Waiter>,
        ack: oneshot::Sender<Result<ChunkAccepted, CoreError>>,
    },
    Connect,
    Status(oneshot::Sender<Status>),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Connected {
        generation: u64,
        url: String,
        link: Link,
    },
    ConnectFailed {
        generation: u64,
        error: CoreError,
    },
    Inbound {
        generation: u64,
        inbound: Inbound,
    },
    Closed {
        generation: u64,
    },
    ReconnectDue,
}

/// Snapshot of the manager for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: LinkState,
    pub mode: Option<ConnectionMode>,
    pub target: Option<String>,
    pub pending_downloads: usize,
    pub pending_uploads: usize,
    pub queued_chunks: usize,
    pub retry_delay: Duration,
}

/// Result of handing one chunk to the manager.
#[derive(Debug)]
pub struct ChunkReceipt {
    pub upload_id: String,
    /// The envelope is waiting for the link to open.
    pub queued: bool,
    /// Present for the first chunk only: resolves when the whole upload completes.
    pub completion: Option<UploadCompletion>,
}

/// Pending result of a whole upload.
#[derive(Debug)]
pub struct UploadCompletion {
    rx: oneshot::Receiver<Result<Completion, CoreError>>,
}

impl UploadCompletion {
    /// Wait for the content address of the uploaded file.
    pub async fn wait(self) -> Result<String, BridgeError> {
        match self.rx.await {
            Ok(Ok(Completion::Uploaded { xorname, .. })) => Ok(xorname),
            Ok(Ok(Completion::File(_))) => Err(BridgeError::InvalidRequest(
                "upload resolved with file data".into(),
            )),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BridgeError::Stopped),
        }
    }
}

/// Handle to the connection manager. Cheap to clone; the loop stops when every
/// handle is gone or `shutdown` is called.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    config: ConfigStore,
}

impl ConnectionManager {
    /// Start the event loop on the current tokio runtime.
    pub fn spawn(config: ConfigStore, connector: Arc<dyn Connector>, events: HostEvents) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let observed = config.current();
        let worker = Worker {
            core: BridgeCore::with_config(observed.core_config()),
            config: config.clone(),
            observed,
            connector,
            events,
            link: None,
            reconnect_timer: None,
            event_tx,
        };
        let config_rx = config.subscribe();
        tokio::spawn(worker.run(command_rx, event_rx, config_rx));
        Self { commands, config }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Fetch the content at `address`. Invalid addresses fail before any I/O.
    pub async fn download(&self, address: &str) -> Result<FileFrame, BridgeError> {
        let address = Address::parse(address)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Download { address, reply })?;
        match rx.await {
            Ok(Ok(Completion::File(frame))) => Ok(frame),
            Ok(Ok(Completion::Uploaded { .. })) => Err(BridgeError::InvalidRequest(
                "download resolved with an upload result".into(),
            )),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BridgeError::Stopped),
        }
    }

    /// Download and wrap as `data:<mime>;base64,<data>`.
    pub async fn download_data_url(&self, address: &str) -> Result<String, BridgeError> {
        Ok(self.download(address).await?.to_data_url())
    }

    /// Hand one chunk to the manager. Returns once the chunk is sent or queued.
    pub async fn upload_chunk(&self, chunk: FileChunk) -> Result<ChunkReceipt, BridgeError> {
        let (completion, completion_rx) = if chunk.is_first() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (ack, ack_rx) = oneshot::channel();
        self.send(Command::UploadChunk {
            chunk,
            completion,
            ack,
        })?;
        let accepted = ack_rx.await.map_err(|_| BridgeError::Stopped)??;
        Ok(ChunkReceipt {
            upload_id: accepted.upload_id,
            queued: accepted.queued,
            completion: completion_rx.map(|rx| UploadCompletion { rx }),
        })
    }

    /// Split `data` into chunks, send them in order and wait for the content address.
    pub async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<String, BridgeError> {
        let chunk_size = self.config.current().chunk_size;
        let mut chunks = split_file(name, mime_type, data, chunk_size).into_iter();
        let first = chunks
            .next()
            .ok_or_else(|| BridgeError::InvalidRequest("nothing to upload".into()))?;
        let receipt = self.upload_chunk(first).await?;
        for mut chunk in chunks {
            chunk.upload_id = Some(receipt.upload_id.clone());
            self.upload_chunk(chunk).await?;
        }
        match receipt.completion {
            Some(c) => c.wait().await,
            None => Err(BridgeError::Stopped),
        }
    }

    /// Make sure a link for the configured mode exists. No-op if one is open or opening.
    pub fn connect(&self) -> Result<(), BridgeError> {
        self.send(Command::Connect)
    }

    pub async fn status(&self) -> Result<Status, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx))?;
        rx.await.map_err(|_| BridgeError::Stopped)
    }

    /// Close the link, fail everything pending and stop the loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .map_err(|_| BridgeError::Stopped)
    }
}

struct Worker {
    core: BridgeCore<Waiter>,
    config: ConfigStore,
    /// Last configuration seen on the watch channel.
    observed: Config,
    connector: Arc<dyn Connector>,
    events: HostEvents,
    /// Generation and sender of the link currently installed.
    link: Option<(u64, mpsc::UnboundedSender<String>)>,
    reconnect_timer: Option<AbortHandle>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut config_rx: watch::Receiver<Config>,
    ) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.stop();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
                Ok(()) = config_rx.changed() => {
                    let config = config_rx.borrow_and_update().clone();
                    self.on_config_observed(config);
                }
                _ = tick.tick() => {
                    let actions = self.core.tick(now());
                    self.apply(actions);
                }
            }
        }
        debug!("connection manager stopped");
    }

    fn stop(&mut self) {
        let actions = self.core.shutdown();
        self.apply(actions);
        self.cancel_reconnect();
        self.link = None;
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn on_command(&mut self, command: Command) {
        let mode = self.config.mode();
        match command {
            Command::Download { address, reply } => {
                debug!(%address, "download requested");
                let actions = self.core.download(address, reply, mode, now());
                self.apply(actions);
            }
            Command::UploadChunk {
                chunk,
                completion,
                ack,
            } => {
                let index = chunk.chunk_index;
                let total = chunk.total_chunks;
                match self.core.upload_chunk(chunk, completion, mode, now()) {
                    Ok((accepted, actions)) => {
                        debug!(upload_id = %accepted.upload_id, index, total, queued = accepted.queued, "chunk accepted");
                        let _ = ack.send(Ok(accepted));
                        self.apply(actions);
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                    }
                }
            }
            Command::Connect => {
                let actions = self.core.request_connect(mode);
                self.apply(actions);
            }
            Command::Status(tx) => {
                let _ = tx.send(Status {
                    state: self.core.state(),
                    mode: self.core.active_mode(),
                    target: self.core.target().map(str::to_string),
                    pending_downloads: self.core.pending_downloads(),
                    pending_uploads: self.core.pending_uploads(),
                    queued_chunks: self.core.queued_chunks(),
                    retry_delay: self.core.retry_delay(),
                });
            }
            Command::Shutdown(_) => {}
        }
    }

    /// Configuration changed: move an existing link to the new mode or target.
    fn on_config_observed(&mut self, config: Config) {
        let previous = std::mem::replace(&mut self.observed, config);
        let config = &self.observed;
        let Some(active) = self.core.active_mode() else {
            return;
        };
        let mode = config.mode;
        if active != mode {
            info!(from = %active, to = %mode, "connection mode changed");
            let actions = self.core.request_connect(mode);
            self.apply(actions);
            return;
        }
        let moved = match mode {
            ConnectionMode::Local => previous.local_port != config.local_port,
            ConnectionMode::Endpoints => {
                self.core.state() == LinkState::Open
                    && self
                        .core
                        .target()
                        .is_some_and(|t| !config.endpoints.iter().any(|e| e == t))
            }
        };
        if moved {
            info!(%mode, "connection target changed");
            let actions = self.core.retarget(mode);
            self.apply(actions);
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Connected {
                generation,
                url,
                link,
            } => {
                if generation != self.core.generation() || self.core.state() != LinkState::Connecting {
                    debug!(%url, generation, "dropping link from an abandoned attempt");
                    return;
                }
                info!(%url, generation, "link open");
                self.cancel_reconnect();
                let Link {
                    outbound,
                    mut inbound,
                } = link;
                self.link = Some((generation, outbound));
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    while let Some(inbound) = inbound.recv().await {
                        if tx.send(Event::Inbound { generation, inbound }).is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Event::Closed { generation });
                });
                let actions = self.core.on_connected(generation, &url);
                self.apply(actions);
            }
            Event::ConnectFailed { generation, error } => {
                warn!(generation, "connect failed: {error}");
                let actions = self
                    .core
                    .on_connect_failed(generation, error, self.config.mode());
                self.apply(actions);
            }
            Event::Inbound {
                generation,
                inbound,
            } => {
                let result = match inbound {
                    Inbound::Text(text) => self.core.on_text(generation, &text),
                    Inbound::Binary(bytes) => self.core.on_binary(generation, &bytes),
                    Inbound::Error(e) => {
                        error!(generation, "transport error: {e}");
                        return;
                    }
                };
                match result {
                    Ok(actions) => self.apply(actions),
                    Err(CoreError::UnknownCorrelationId(id)) => {
                        warn!(%id, "reply has no pending request, dropped")
                    }
                    Err(e) => warn!(generation, "bad frame: {e}"),
                }
            }
            Event::Closed { generation } => {
                if matches!(self.link, Some((g, _)) if g == generation) {
                    self.link = None;
                }
                info!(generation, "link closed");
                let actions = self.core.on_link_closed(generation, self.config.mode());
                self.apply(actions);
            }
            Event::ReconnectDue => {
                let actions = self.core.on_reconnect_due(self.config.mode());
                self.apply(actions);
            }
        }
    }

    fn apply(&mut self, actions: Vec<Action<Waiter>>) {
        for action in actions {
            match action {
                Action::Connect { generation, mode } => {
                    info!(%mode, generation, "connecting");
                    self.cancel_reconnect();
                    let store = self.config.clone();
                    let connector = self.connector.clone();
                    let tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let event = match selector::select_with_store(mode, &store, connector).await {
                            Ok((url, link)) => Event::Connected {
                                generation,
                                url,
                                link,
                            },
                            Err(e) => Event::ConnectFailed {
                                generation,
                                error: select_error(e),
                            },
                        };
                        let _ = tx.send(event);
                    });
                }
                Action::CloseLink => {
                    self.cancel_reconnect();
                    if let Some((generation, _)) = self.link.take() {
                        debug!(generation, "closing link");
                    }
                }
                Action::Send(text) => match &self.link {
                    Some((_, tx)) => {
                        if tx.send(text).is_err() {
                            warn!("link writer gone, frame dropped");
                        }
                    }
                    None => warn!("no link, frame dropped"),
                },
                Action::Resolve { waiter, outcome } => {
                    if let Err(e) = &outcome {
                        debug!("request failed: {e}");
                    }
                    // the caller may have gone away; that is fine
                    let _ = waiter.send(outcome);
                }
                Action::ScheduleReconnect(delay) => {
                    info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    self.cancel_reconnect();
                    let tx = self.event_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Event::ReconnectDue);
                    });
                    self.reconnect_timer = Some(timer.abort_handle());
                }
                Action::Notify { title, message } => self.events.notify(&title, &message),
            }
        }
    }
}

fn select_error(e: SelectError) -> CoreError {
    match e {
        SelectError::NoEndpoints | SelectError::NoneReachable(_) => {
            CoreError::NoReachableEndpoint(e.to_string())
        }
        SelectError::Transport(t) => CoreError::Transport(t.to_string()),
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
