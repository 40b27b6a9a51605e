use std::io;

use thiserror::Error;

/// Errors produced by testers, endpoints and the packet parsers.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket creation or bind failed, typically for lack of raw-socket
    /// privileges.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// The network string is not one of the supported probe or
    /// maintenance networks.
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),

    /// The listening or destination address could not be parsed.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Receiving from a socket failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Transmitting a probe failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// A received packet does not carry a well-formed ICMP message, or an
    /// ICMP error body does not carry a well-formed IP header.
    #[error("malformed ICMP message: {0}")]
    ParseIcmp(&'static str),

    /// An ICMP error body is shorter than the embedded IP header plus the
    /// RFC-minimum eight bytes of original transport data.
    #[error("ICMP error message too short: type {icmp_type}, code {code}")]
    TruncatedIcmpError { icmp_type: u8, code: u8 },

    /// A loopback read deadline elapsed without a matching reply.
    #[error("read timed out")]
    Timeout,

    /// The endpoint has already been closed.
    #[error("endpoint already closed")]
    Closed,
}

impl Error {
    /// The `io::ErrorKind` of the underlying socket error, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Bind(e) | Error::Read(e) | Error::Write(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub(crate) fn is_would_block(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(io::ErrorKind::WouldBlock) | Some(io::ErrorKind::TimedOut)
        )
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        matches!(self.io_kind(), Some(io::ErrorKind::Interrupted))
    }
}
