use thiserror::Error;

use crate::core::ConnectionId;

/// Errors raised by the hub while handling a connection.
///
/// Every variant is fatal to the connection that caused it; the router turns
/// the `Display` text into the close reason sent to the client.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("User is not subscribed")]
    NotSubscribed { feed: String },

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("{0}")]
    Protocol(String),

    #[error("Failed to encode message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HubError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        HubError::Protocol(reason.into())
    }
}

pub type HubResult<T> = Result<T, HubError>;
