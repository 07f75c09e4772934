//! Backend query client.
//!
//! One UDP socket per query, reused across attempts. Each attempt sends
//! the datagram and waits for a reply under a per-attempt deadline; the
//! receive is cancelled on expiry and the send repeated, up to the
//! configured number of retries.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Maximum UDP datagram the proxy will accept.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65536;

/// Sends serialized requests to backends and collects replies.
#[derive(Debug, Clone)]
pub struct BackendClient {
    /// Per-attempt receive deadline.
    timeout: Duration,
    /// Retries after the first attempt; total attempts = retries + 1.
    retries: u32,
}

impl BackendClient {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Send `datagram` to `target` and wait for a reply.
    ///
    /// Returns the first non-empty datagram received within any
    /// attempt's deadline, verbatim. Because the socket is reused
    /// across attempts, a late reply to an earlier attempt may be
    /// accepted as the current attempt's reply; it answers the same
    /// request, so callers treat it identically.
    pub async fn query(&self, target: SocketAddr, datagram: &[u8]) -> Result<Bytes> {
        // A query socket is throwaway: an ephemeral port in the
        // target's address family, no listener options. Only the
        // ingress socket needs socket2 treatment.
        let bind_addr: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| Error::Network { target, source })?;

        let start = Instant::now();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        for attempt in 0..=self.retries {
            if attempt > 0 {
                tracing::debug!(
                    target: "snmp_cache_proxy::backend",
                    backend = %target,
                    attempt,
                    "retrying backend query"
                );
            }

            socket
                .send_to(datagram, target)
                .await
                .map_err(|source| Error::Network { target, source })?;

            match tokio::time::timeout(self.timeout, recv_nonempty(&socket, &mut buf)).await {
                Ok(Ok(len)) => {
                    tracing::trace!(
                        target: "snmp_cache_proxy::backend",
                        backend = %target,
                        bytes = len,
                        "backend reply"
                    );
                    return Ok(Bytes::copy_from_slice(&buf[..len]));
                }
                Ok(Err(source)) => return Err(Error::Network { target, source }),
                // Deadline expired; the pending receive is dropped and
                // the next attempt starts clean.
                Err(_elapsed) => continue,
            }
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            target: "snmp_cache_proxy::backend",
            backend = %target,
            ?elapsed,
            retries = self.retries,
            "backend query timed out"
        );
        Err(Error::Timeout {
            target,
            elapsed,
            retries: self.retries,
        })
    }
}

/// Receive the next non-empty datagram, skipping zero-length ones.
async fn recv_nonempty(socket: &UdpSocket, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let (len, _source) = socket.recv_from(buf).await?;
        if len > 0 {
            return Ok(len);
        }
    }
}
