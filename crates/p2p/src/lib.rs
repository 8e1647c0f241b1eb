//! Peer-to-peer plumbing: newline-delimited JSON envelopes over TCP.
//!
//! The [`Sender`] keeps one reused connection per destination address
//! and retries failed writes on a fixed cadence; the [`Receiver`] runs
//! one thread per inbound connection and dispatches decoded envelopes
//! to the [`Reactor`] registered for each channel.

mod envelope;
mod receiver;
mod sender;

pub use envelope::{ChannelId, Envelope, MessageType};
pub use receiver::Receiver;
pub use sender::Sender;

/// Errors from the p2p layer.
#[derive(Debug, thiserror::Error)]
pub enum P2pError {
    /// Socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope encode/decode failed.
    #[error("envelope error: {0}")]
    Envelope(String),

    /// The envelope named a channel nothing is registered for.
    #[error("unknown channel {0}")]
    UnknownChannel(u8),

    /// The envelope carried an unknown message-type tag.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// A send exhausted its retry budget.
    #[error("send to {addr} failed after {attempts} attempts")]
    SendFailed {
        /// Destination address.
        addr: String,
        /// Attempts made.
        attempts: u32,
    },

    /// No peer exists at the requested shard slot.
    #[error("peer [{shard}, {index}] does not exist")]
    NoSuchPeer {
        /// Requested shard.
        shard: String,
        /// Requested index.
        index: usize,
    },

    /// A reactor rejected the message.
    #[error("{0}")]
    Reactor(String),
}

/// A message sink for one channel.
///
/// Errors returned here are logged and discarded by the receiver; they
/// never propagate past the dispatch boundary.
pub trait Reactor: Send + Sync {
    /// Handle one decoded payload.
    fn receive(
        &self,
        channel: ChannelId,
        payload: &[u8],
        message_type: MessageType,
    ) -> Result<(), P2pError>;
}
