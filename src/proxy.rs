//! The caching proxy server.
//!
//! The receive loop accepts SNMPv2c requests whose community string
//! names the backend to query (`host[@index]`), rewrites the community
//! to the configured backend community (suffix re-attached), and
//! answers from the TTL cache or by forwarding. Each datagram is
//! handled in its own task, bounded by a semaphore, so a slow backend
//! does not block other clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendClient, MAX_DATAGRAM_SIZE};
use crate::cache::{CacheKey, ResponseCache};
use crate::error::{Error, Result};
use crate::message::{PduType, RESOURCE_UNAVAILABLE, SnmpMessage};

/// Standard UDP port for SNMP agents.
pub const SNMP_PORT: u16 = 161;

/// Builder for [`Proxy`].
pub struct ProxyBuilder {
    bind_addr: String,
    backend_community: String,
    backend_timeout: Duration,
    backend_retries: u32,
    backend_port: u16,
    cache_ttl: Duration,
    max_in_flight: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl ProxyBuilder {
    /// Create a builder with default settings.
    ///
    /// Defaults:
    /// - Bind address: `0.0.0.0:161` (UDP)
    /// - Backend timeout: 2 seconds per attempt
    /// - Backend retries: 2 (three attempts total)
    /// - Backend port: 161
    /// - Cache TTL: 300 seconds
    /// - Max in-flight requests: 1000
    pub fn new(backend_community: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:161".to_string(),
            backend_community: backend_community.into(),
            backend_timeout: Duration::from_secs(2),
            backend_retries: 2,
            backend_port: SNMP_PORT,
            cache_ttl: Duration::from_secs(300),
            max_in_flight: Some(1000),
            cancel: None,
        }
    }

    /// Set the UDP bind address (default `0.0.0.0:161`).
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the per-attempt backend receive deadline.
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn backend_retries(mut self, retries: u32) -> Self {
        self.backend_retries = retries;
        self
    }

    /// Set the UDP port queried on backends (default 161).
    pub fn backend_port(mut self, port: u16) -> Self {
        self.backend_port = port;
        self
    }

    /// Set the cache entry lifetime and evictor sweep period.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Bound concurrent request handling (default 1000). `None` means
    /// unbounded.
    pub fn max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Set a cancellation token for graceful shutdown.
    ///
    /// If not set, the proxy creates its own token accessible via
    /// [`Proxy::cancel`].
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bind the listening socket and build the proxy.
    pub fn build(self) -> Result<Proxy> {
        if self.backend_community.is_empty() {
            return Err(Error::Config("backend community must not be empty".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::Config("cache TTL must be non-zero".into()));
        }

        let bind_addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind address: {}", self.bind_addr)))?;

        let socket = bind_ingress_socket(bind_addr).map_err(|source| Error::Bind {
            addr: bind_addr,
            source,
        })?;
        let local_addr = socket.local_addr().map_err(|source| Error::Bind {
            addr: bind_addr,
            source,
        })?;

        tracing::info!(
            target: "snmp_cache_proxy::proxy",
            %local_addr,
            cache_ttl = ?self.cache_ttl,
            backend_timeout = ?self.backend_timeout,
            backend_retries = self.backend_retries,
            "proxy bound"
        );

        Ok(Proxy {
            inner: Arc::new(ProxyInner {
                socket,
                local_addr,
                backend_community: self.backend_community,
                backend_port: self.backend_port,
                backend: BackendClient::new(self.backend_timeout, self.backend_retries),
                cache: ResponseCache::new(self.cache_ttl),
                limit: self.max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
                cancel: self.cancel.unwrap_or_default(),
            }),
        })
    }
}

struct ProxyInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    backend_community: String,
    backend_port: u16,
    backend: BackendClient,
    cache: ResponseCache,
    limit: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

/// Caching SNMPv2c proxy.
///
/// # Example
///
/// ```rust,no_run
/// use snmp_cache_proxy::Proxy;
/// use std::time::Duration;
///
/// # async fn example() -> snmp_cache_proxy::Result<()> {
/// let proxy = Proxy::builder("public")
///     .bind("0.0.0.0:161")
///     .backend_timeout(Duration::from_secs(2))
///     .cache_ttl(Duration::from_secs(300))
///     .build()?;
///
/// proxy.run().await
/// # }
/// ```
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Create a builder for configuring the proxy.
    ///
    /// `backend_community` is the real SNMP community sent toward
    /// backends; the ingress community only selects the backend.
    pub fn builder(backend_community: impl Into<String>) -> ProxyBuilder {
        ProxyBuilder::new(backend_community)
    }

    /// Get the local address the proxy is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Get the cancellation token for this proxy.
    ///
    /// Call `token.cancel()` to initiate graceful shutdown.
    pub fn cancel(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Number of entries currently cached.
    pub fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    /// Run the proxy: start the evictor and process requests until the
    /// cancellation token is triggered.
    pub async fn run(&self) -> Result<()> {
        Self::start_evictor(self.inner.clone());

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, peer) = tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    tracing::info!(target: "snmp_cache_proxy::proxy", "proxy shutdown requested");
                    return Ok(());
                }
                result = self.inner.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::error!(target: "snmp_cache_proxy::proxy", error = %e, "UDP recv error");
                        continue;
                    }
                },
            };

            let data = Bytes::copy_from_slice(&buf[..len]);
            let inner = self.inner.clone();

            let permit = if let Some(ref sem) = self.inner.limit {
                Some(sem.clone().acquire_owned().await.expect("semaphore closed"))
            } else {
                None
            };

            tokio::spawn(async move {
                handle_datagram(&inner, data, peer).await;
                drop(permit);
            });
        }
    }

    /// Background sweep of expired cache entries, once per TTL period.
    ///
    /// Best-effort: the hot path already evicts stale entries it
    /// touches; this reclaims memory for keys that are never queried
    /// again.
    fn start_evictor(inner: Arc<ProxyInner>) {
        tokio::spawn(async move {
            let mut period = tokio::time::interval(inner.cache.ttl());
            period.tick().await; // the first tick completes immediately

            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = period.tick() => {
                        let evicted = inner.cache.sweep_expired(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(
                                target: "snmp_cache_proxy::cache",
                                evicted,
                                remaining = inner.cache.len(),
                                "evicted stale cache entries"
                            );
                        }
                    }
                }
            }
        });
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Process one ingress datagram through the full request state machine.
async fn handle_datagram(inner: &ProxyInner, data: Bytes, peer: SocketAddr) {
    // Malformed datagrams are dropped without a reply; parse already
    // traced the reason.
    let Ok(mut request) = SnmpMessage::parse(&data) else {
        return;
    };

    // Unsolicited responses arriving on the ingress port are discarded.
    if !request.pdu_type().is_request() {
        tracing::debug!(
            target: "snmp_cache_proxy::proxy",
            source = %peer,
            pdu_type = %request.pdu_type(),
            "dropping non-request PDU"
        );
        return;
    }

    let backend_host = request.community().to_string();
    let backend_suffix = request.community_index().to_string();

    tracing::debug!(
        target: "snmp_cache_proxy::proxy",
        source = %peer,
        community = %backend_host,
        suffix = %backend_suffix,
        pdu_type = %request.pdu_type(),
        "received request"
    );

    // Rewrite the community for the backend, re-attaching the context
    // suffix the client supplied.
    request.set_community(format!("{}{}", inner.backend_community, backend_suffix));

    // Key on the request as forwarded, so different client-side labels
    // for the same backend share an entry.
    let key = CacheKey {
        backend_host: backend_host.clone(),
        community: inner.backend_community.clone(),
        community_index: backend_suffix,
        pdu_type: request.pdu_type(),
        data: Bytes::copy_from_slice(request.data()),
    };

    if let Some(cached) = inner.cache.lookup(&key, Instant::now()) {
        tracing::debug!(
            target: "snmp_cache_proxy::proxy",
            backend = %backend_host,
            "cache hit"
        );
        let mut response = request.clone();
        response.set_pdu_type(PduType::GetResponse);
        response.set_community(backend_host);
        response.set_data(cached.as_ref());
        send_to_client(inner, &response.serialize(), peer).await;
        return;
    }

    match forward(inner, &backend_host, &request).await {
        Ok(reply_bytes) => match SnmpMessage::parse(&reply_bytes) {
            Ok(mut reply) => {
                inner.cache.insert(
                    key,
                    Bytes::copy_from_slice(reply.data()),
                    Instant::now(),
                );
                reply.set_community(backend_host);
                send_to_client(inner, &reply.serialize(), peer).await;
            }
            Err(_) => {
                // Unparseable backend replies pass through uncached.
                tracing::debug!(
                    target: "snmp_cache_proxy::proxy",
                    backend = %backend_host,
                    bytes = reply_bytes.len(),
                    "forwarding unparseable backend reply verbatim"
                );
                send_to_client(inner, &reply_bytes, peer).await;
            }
        },
        Err(err) if err.is_backend_unavailable() => {
            // Timeouts and resolution failures are answered with a
            // cached resourceUnavailable so an unreachable backend is
            // not hammered for a full TTL.
            tracing::debug!(
                target: "snmp_cache_proxy::proxy",
                backend = %backend_host,
                error = %err,
                "backend unavailable, synthesizing resourceUnavailable"
            );
            let mut response = request.clone();
            response.set_pdu_type(PduType::GetResponse);
            response.set_error(RESOURCE_UNAVAILABLE);
            response.set_community(backend_host);
            inner.cache.insert(
                key,
                Bytes::copy_from_slice(response.data()),
                Instant::now(),
            );
            send_to_client(inner, &response.serialize(), peer).await;
        }
        Err(err) => {
            tracing::warn!(
                target: "snmp_cache_proxy::proxy",
                backend = %backend_host,
                error = %err,
                "backend query failed"
            );
        }
    }
}

/// Resolve the backend and query it with the serialized request.
async fn forward(inner: &ProxyInner, backend_host: &str, request: &SnmpMessage) -> Result<Bytes> {
    let endpoint = resolve_backend(backend_host, inner.backend_port).await?;
    inner.backend.query(endpoint, &request.serialize()).await
}

/// Resolve a backend host to a UDP endpoint on the SNMP port.
async fn resolve_backend(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| Error::Resolve {
            host: host.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| Error::Resolve {
        host: host.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
    })
}

/// Bind the long-lived ingress socket.
///
/// The listener sits on a fixed well-known port for the life of the
/// process, so it is built through socket2: SO_REUSEADDR lets a
/// restarted proxy reclaim the port while the old socket drains, and an
/// IPv6 bind is pinned to IPv6 only so ingress addresses are never
/// reported in mapped form. The per-query backend sockets have neither
/// concern and bind ephemeral ports directly (see
/// [`BackendClient::query`]).
fn bind_ingress_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;

    // tokio requires the fd to be non-blocking before adoption
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Send a response datagram back to the originating client.
///
/// A send failure is logged and the request treated as complete.
async fn send_to_client(inner: &ProxyInner, bytes: &[u8], peer: SocketAddr) {
    if let Err(e) = inner.socket.send_to(bytes, peer).await {
        tracing::warn!(
            target: "snmp_cache_proxy::proxy",
            client = %peer,
            error = %e,
            "failed to send response"
        );
    }
}
