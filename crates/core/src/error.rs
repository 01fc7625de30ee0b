//! Error types for the SAT>IP client library.

use std::fmt;

/// Errors that can occur in the SAT>IP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`Status`](Self::Status),
///   [`MissingHeader`](Self::MissingHeader).
/// - **Transport**: [`Io`](Self::Io), [`PortPairExhausted`](Self::PortPairExhausted).
/// - **Session**: [`SessionNotReady`](Self::SessionNotReady),
///   [`NotConnected`](Self::NotConnected).
///
/// Most of these feed the session's error policy: the state machine reduces
/// them to either "continue", "reset the session", or "give up".
#[derive(Debug, thiserror::Error)]
pub enum SatipError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The server answered with a status code other than 200 OK.
    #[error("RTSP status {0}")]
    Status(u16),

    /// A mandatory header was absent from a SETUP response.
    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    /// PLAY, OPTIONS or TEARDOWN was attempted before the first SETUP
    /// response delivered a session id and stream id.
    #[error("session id and stream id are required")]
    SessionNotReady,

    /// Could not bind an adjacent RTP/RTCP UDP port pair within the
    /// bounded number of probe attempts.
    #[error("unable to bind an adjacent RTP/RTCP port pair")]
    PortPairExhausted,

    /// An operation needed the control socket but the session is not
    /// connected.
    #[error("not connected to the RTSP server")]
    NotConnected,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, SatipError>`.
pub type Result<T> = std::result::Result<T, SatipError>;
