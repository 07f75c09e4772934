//! Shared fixtures for proxy integration tests.

pub mod backend;

#[allow(unused_imports)]
pub use backend::{GarbageBackend, SilentBackend, StubBackend};

use snmp_cache_proxy::{Proxy, ber};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Request tail with zeroed error fields and an empty varbind list.
#[allow(dead_code)]
pub const REQUEST_TAIL: &[u8] = &[0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x00];

/// An in-process proxy bound to an ephemeral localhost port.
///
/// Starts on creation and shuts down on drop.
pub struct TestProxy {
    proxy: Proxy,
    addr: SocketAddr,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl TestProxy {
    /// Start a proxy with backend community "public".
    pub async fn start(
        backend_port: u16,
        cache_ttl: Duration,
        backend_timeout: Duration,
        backend_retries: u32,
    ) -> Self {
        let cancel = CancellationToken::new();

        let proxy = Proxy::builder("public")
            .bind("127.0.0.1:0")
            .backend_port(backend_port)
            .cache_ttl(cache_ttl)
            .backend_timeout(backend_timeout)
            .backend_retries(backend_retries)
            .cancel(cancel.clone())
            .build()
            .expect("failed to build test proxy");

        let addr = proxy.local_addr();
        let runner = proxy.clone();
        let task = tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Self {
            proxy,
            addr,
            cancel,
            _task: task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[allow(dead_code)]
    pub fn cached_entries(&self) -> usize {
        self.proxy.cached_entries()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a GetRequest datagram for `community` with the given request
/// ID and tail.
#[allow(dead_code)]
pub fn get_request(community: &str, request_id: [u8; 4], tail: &[u8]) -> Vec<u8> {
    let pdu_len = 6 + tail.len() as u64;
    let env_len = 3
        + 1
        + ber::encoded_len(community.len() as u64) as u64
        + community.len() as u64
        + 1
        + ber::encoded_len(pdu_len) as u64
        + pdu_len;

    let mut out = vec![0x30];
    let (buf, len) = ber::encode_uint(env_len);
    out.extend_from_slice(&buf[..len]);
    out.extend_from_slice(&[0x02, 0x01, 0x01]);
    out.push(0x04);
    let (buf, len) = ber::encode_uint(community.len() as u64);
    out.extend_from_slice(&buf[..len]);
    out.extend_from_slice(community.as_bytes());
    out.push(0xA0);
    let (buf, len) = ber::encode_uint(pdu_len);
    out.extend_from_slice(&buf[..len]);
    out.extend_from_slice(&[0x02, 0x04]);
    out.extend_from_slice(&request_id);
    out.extend_from_slice(tail);
    out
}

/// Send `request` to the proxy and wait up to `wait` for a response.
#[allow(dead_code)]
pub async fn exchange_with(addr: SocketAddr, request: &[u8], wait: Duration) -> Option<Vec<u8>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(request, addr).await.unwrap();

    let mut buf = vec![0u8; 65536];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _source))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

/// Send `request` to the proxy and wait up to two seconds.
#[allow(dead_code)]
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Option<Vec<u8>> {
    exchange_with(addr, request, Duration::from_secs(2)).await
}
