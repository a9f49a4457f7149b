//! Errors surfaced by the communicator to the owner of its node.

use pithos_core::wire::WireError;
use pithos_core::Component;

/// Failure of the transport sender.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("underlay is still bootstrapping, cannot send")]
    UnderlayNotReady,

    #[error("cannot send a unit with an unspecified destination address")]
    UnspecifiedDestination,

    #[error("failed to encode datagram: {0}")]
    Encode(#[from] WireError),

    #[error("transport send failed: {0:#}")]
    Transport(anyhow::Error),
}

/// Failure while routing a unit, call or response.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("received unknown message type {0} from the transport")]
    UnknownMessageType(u8),

    #[error("underlay is still bootstrapping")]
    UnderlayNotReady,

    #[error("cannot send a unit with an unspecified destination address")]
    UnspecifiedDestination,

    #[error("required sub-component {0:?} is not present on this node")]
    MissingSubComponent(Component),

    #[error("malformed datagram: {0}")]
    Malformed(WireError),

    #[error("transport send failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("overlay route failed: {0:#}")]
    Overlay(anyhow::Error),
}

impl RouteError {
    /// Fatal errors stop the node; the rest are reported and processing continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RouteError::Malformed(_))
    }
}

impl From<SendError> for RouteError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::UnderlayNotReady => RouteError::UnderlayNotReady,
            SendError::UnspecifiedDestination => RouteError::UnspecifiedDestination,
            SendError::Encode(e) => RouteError::Malformed(e),
            SendError::Transport(e) => RouteError::Transport(e),
        }
    }
}

impl From<WireError> for RouteError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownPayloadType(t) => RouteError::UnknownMessageType(t),
            other => RouteError::Malformed(other),
        }
    }
}
