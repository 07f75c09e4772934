//! Error types for snmp-cache-proxy.

use std::net::SocketAddr;
use std::time::Duration;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for all proxy operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Network failure (send/receive on an established socket).
    #[error("network error communicating with {target}: {source}")]
    Network {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Could not bind the listening socket.
    #[error("could not bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Backend did not reply within the deadline, across all retries.
    #[error("timeout after {elapsed:?} waiting for {target} ({retries} retries)")]
    Timeout {
        target: SocketAddr,
        elapsed: Duration,
        retries: u32,
    },

    /// Backend host could not be resolved to an endpoint.
    #[error("could not resolve backend host {host:?}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Datagram is not a well-formed SNMPv2c message.
    #[error("malformed SNMPv2c message: {reason}")]
    Malformed { reason: &'static str },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn malformed(reason: &'static str) -> Self {
        Error::Malformed { reason }
    }

    /// True for errors answered with a synthetic resourceUnavailable
    /// response (unreachable or unresolvable backend).
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Resolve { .. })
    }
}
