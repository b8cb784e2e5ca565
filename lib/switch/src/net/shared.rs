use std::io;

use telehash_core::crypto::CryptoError;

/// Default UDP port for a switch.
pub const DEFAULT_PORT: u16 = 42424;

/// Upper bound for a rendered datagram, keeping packets under typical MTUs.
pub const MAX_PACKET_SIZE: usize = 1400;

pub type NetResult<T> = Result<T, NetError>;

/// Errors raised while decoding or validating wire input. Everything
/// originating on the wire is logged and dropped; nothing here is fatal to
/// the reactor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NetError {
    /// Framing or JSON structure is invalid.
    Malformed(&'static str),
    /// Well formed packet with an unregistered `type`.
    UnknownType(String),
    /// A structurally valid open failed a handshake check.
    Rejected(RejectReason),
    /// A cryptographic primitive failed unexpectedly.
    Crypto,
    Io(io::ErrorKind),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectReason {
    Stale,
    WrongDestination,
    BadSignature,
    DecryptFailure,
    Replay,
}

/// Terminal outcomes surfaced through an open completion handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenFailure {
    /// No matching open arrived within the configured window.
    Timeout,
    /// The destination node carries no endpoint to send to.
    NoEndpoint,
    /// Rendering the open failed (typically an undersized RSA key).
    Crypto,
    SwitchStopped,
}

/// Errors delivered to channel handlers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelError {
    /// A newer open from the peer superseded the line.
    LineReplaced,
    /// The line went idle past the configured timeout, or the channel was
    /// opened against a line that no longer exists.
    LineClosed,
    SwitchStopped,
}

/// Errors returned synchronously to application threads pushing work at the
/// reactor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendError {
    /// The command queue is full; the caller may retry.
    Backpressure,
    /// The payload cannot fit in a single datagram.
    PayloadTooLarge,
    /// The switch is not running.
    SwitchStopped,
}

#[derive(Debug)]
pub enum StartError {
    AlreadyRunning,
    Bind(io::Error),
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(err: io::Error) -> Self {
        NetError::Io(err.kind())
    }
}

impl From<CryptoError> for NetError {
    #[inline]
    fn from(_: CryptoError) -> Self {
        NetError::Crypto
    }
}

impl From<serde_json::Error> for NetError {
    #[inline]
    fn from(_: serde_json::Error) -> Self {
        NetError::Malformed("invalid json")
    }
}
