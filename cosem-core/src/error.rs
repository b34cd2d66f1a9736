use thiserror::Error;

/// Error type shared by all layers of the stack.
///
/// Local recovery happens only inside the HDLC link layer (REJ and
/// retransmission up to the retry cap); everything else surfaces here.
#[derive(Error, Debug)]
pub enum CosemError {
    /// Underlying I/O failure (read/write/connect/close).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// SNRM/DISC/response timer expiry.
    #[error("timeout")]
    Timeout,

    /// Wrapper mismatch, LLC mismatch, HCS/FCS failure, truncated or
    /// malformed frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// A-XDR / BER / APDU encode or decode failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// AARE.result was not "accepted".
    #[error("association rejected: result {result}, diagnostic {diagnostic}")]
    AssociationRejected { result: u8, diagnostic: i64 },

    /// Unexpected security control, wrong glo tag, wrong mechanism name,
    /// bad system title, unsupported mechanism.
    #[error("security error: {0}")]
    Security(String),

    /// GCM authentication tag mismatch, in either direction.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Unknown APDU tag, out-of-order block, duplicate invoke-id.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bad key length, bad address, invalid tuning parameter.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation on a connection that has already been shut down.
    #[error("connection closed")]
    Closed,
}

/// Result alias used throughout the stack.
pub type CosemResult<T> = Result<T, CosemError>;
