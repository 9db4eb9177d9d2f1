//! Wire error types

use thiserror::Error;

/// Wire layer errors
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame is truncated or the declared header length overruns the buffer
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Header bytes are not a valid JSON object
    #[error("malformed header: {0}")]
    MalformedHeader(#[source] serde_json::Error),

    /// Header JSON does not fit the 16-bit length prefix
    #[error("header too large: {0} bytes")]
    HeaderTooLarge(usize),

    /// Not a lowercase base32 hashname of the right length
    #[error("invalid hashname: {0}")]
    InvalidHashname(&'static str),
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
