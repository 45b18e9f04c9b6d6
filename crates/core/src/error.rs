//! Error types for the camera streaming library.

use std::fmt;

use crate::session::SessionState;

/// Errors that can occur across the RTSP, RTP and RTMP paths.
///
/// Variants group into the failure classes the server distinguishes:
///
/// - **I/O**: [`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed):
///   socket failures; the owning connection is torn down.
/// - **Protocol**: [`Parse`](Self::Parse), [`Protocol`](Self::Protocol),
///   [`UnsupportedCodec`](Self::UnsupportedCodec), [`Amf`](Self::Amf),
///   [`Handshake`](Self::Handshake): malformed peer input.
/// - **State**: [`InvalidState`](Self::InvalidState): method used in the
///   wrong session state.
/// - **Resources**: [`BufferOverflow`](Self::BufferOverflow),
///   [`BufferFull`](Self::BufferFull),
///   [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Timeout**: [`Timeout`](Self::Timeout).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    ///
    /// `cseq` is the request's `CSeq` when the head still carried one, so
    /// the 400 answer can echo it.
    #[error("RTSP parse error: {kind}")]
    Parse {
        kind: ParseErrorKind,
        cseq: Option<String>,
    },

    /// Well-formed but unacceptable request content (e.g. a bad `Transport` header).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream source reports a codec no packetizer exists for.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Method invoked in a session state that does not allow it.
    #[error("{method} not valid in state {state:?}")]
    InvalidState {
        method: String,
        state: SessionState,
    },

    /// A [`ByteWriter`](crate::writer::ByteWriter) ran out of room.
    #[error("buffer overflow: needed {needed} bytes, {remaining} remaining")]
    BufferOverflow { needed: usize, remaining: usize },

    /// A ring buffer rejected a record for lack of space.
    #[error("ring buffer full")]
    BufferFull,

    /// No free UDP port pair in the configured range.
    #[error("UDP port range exhausted")]
    PortRangeExhausted,

    /// Peer did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// RTMP handshake failure.
    #[error("RTMP handshake error: {0}")]
    Handshake(String),

    /// AMF0 encode/decode failure.
    #[error("AMF error: {0}")]
    Amf(&'static str),

    /// The RTMP server refused `connect`, `createStream` or `publish`.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    /// The push URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A push session with the same key is already live.
    #[error("session already exists")]
    SessionExists,

    /// [`Server::stop`](crate::Server::stop) was called before `start`.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Request head was not valid UTF-8.
    InvalidEncoding,
    /// `Content-Length` was not a decimal byte count.
    InvalidContentLength,
    /// `Content-Length` announced more than the server buffers.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidEncoding => write!(f, "request is not valid UTF-8"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::BodyTooLarge => write!(f, "request body too large"),
        }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
