use safebox_core::{AddressError, CoreError};

/// Errors surfaced to callers of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("helper request failed: {0}")]
    Helper(#[from] reqwest::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection manager stopped")]
    Stopped,
}

impl From<AddressError> for BridgeError {
    fn from(e: AddressError) -> Self {
        BridgeError::Core(CoreError::InvalidAddress(e))
    }
}

impl BridgeError {
    /// True for errors raised before any I/O happened.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            BridgeError::Core(CoreError::InvalidAddress(_))
                | BridgeError::Core(CoreError::InvalidChunk(_))
                | BridgeError::InvalidRequest(_)
        )
    }
}
