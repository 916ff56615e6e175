use thiserror::Error;

/// Failure reported by a host platform.
///
/// The type is `Clone` because one refusal from the host is handed to every
/// caller that was queued behind the same subscription request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Host rejected query: {0}")]
    InvalidQuery(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
