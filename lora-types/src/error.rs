//! Error types for the bridge data model.

use thiserror::Error;

/// Errors raised while converting between events, entities and wire frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame has fewer than the required header + payload fields.
    #[error("malformed frame: expected at least {expected} fields, got {actual}")]
    MalformedFrame {
        /// Minimum number of fields required.
        expected: usize,
        /// Number of fields found after prefix stripping.
        actual: usize,
    },

    /// A header field cannot be framed (contains the delimiter or a newline).
    #[error("invalid {field} field: {reason}")]
    InvalidField {
        /// Header field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Transport-encoded payload could not be decoded.
    #[error("transport decoding failed: {0}")]
    TransportEncoding(#[from] base64::DecodeError),

    /// XML text could not be parsed.
    #[error("xml error: {0}")]
    Xml(String),

    /// Parsed XML does not describe a CoT event.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Compaction or expansion of structured text failed.
    #[error("compaction failed: {0}")]
    Compaction(String),

    /// Entity has no text to encode.
    #[error("entity {id} has no text payload")]
    MissingPayload {
        /// Entity id.
        id: String,
    },
}
