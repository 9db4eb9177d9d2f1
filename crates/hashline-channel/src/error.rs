//! Channel error types

use hashline_wire::Packet;
use thiserror::Error;

/// Channel layer errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Send window is full
    #[error("send window is full")]
    WouldBlock,

    /// Receive deadline expired, or a packet exhausted its retransmits
    #[error("operation timed out")]
    Timeout,

    /// Channel or buffer is closed
    #[error("channel is closed")]
    Closed,

    /// The peer ended the channel with an error; the terminal packet rides
    /// along with it
    #[error("remote error: {message}")]
    Remote {
        /// The peer's `err` header
        message: String,
        /// The packet that carried it
        pkt: Box<Packet>,
    },

    /// The line layer failed to deliver a packet
    #[error("line transport error: {0}")]
    Line(String),

    /// Bug surfaced by the handler crash barrier
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
