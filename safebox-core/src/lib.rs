//! SafeBox bridge core.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod address;
pub mod chunk;
pub mod core;
pub mod pending;
pub mod protocol;
pub mod reconnect;
pub mod wire;

pub use address::{Address, AddressError};
pub use chunk::{FileChunk, DEFAULT_CHUNK_SIZE};
pub use self::core::{Action, BridgeCore, ChunkAccepted, Completion, CoreConfig, CoreError, LinkState};
pub use protocol::{ClientMessage, ConnectionMode, ServerMessage, DEFAULT_LOCAL_PORT};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use wire::{decode_file_frame, encode_file_frame, FileFrame, FileMetadata, FrameDecodeError};
