use thiserror::Error;

/// Errors raised while encoding or decoding wire values and frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),
    #[error("trailing bytes after value")]
    TrailingBytes,
    #[error("string value is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
