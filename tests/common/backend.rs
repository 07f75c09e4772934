//! In-process stub backends for proxy testing.
//!
//! Backends bind to ephemeral localhost ports, record what the proxy
//! forwarded, and shut down cleanly on drop.

use snmp_cache_proxy::{PduType, SnmpMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A backend that answers every request with a GetResponse carrying a
/// fixed tail, and records the community of each forwarded request.
pub struct StubBackend {
    addr: SocketAddr,
    communities: Arc<Mutex<Vec<String>>>,
    requests: Arc<AtomicUsize>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl StubBackend {
    pub async fn with_tail(tail: Vec<u8>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let communities = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let communities = communities.clone();
            let requests = requests.clone();
            let cancel = cancel.clone();
            async move {
                let mut buf = vec![0u8; 65536];
                loop {
                    let (len, peer) = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = socket.recv_from(&mut buf) => match result {
                            Ok(received) => received,
                            Err(_) => break,
                        },
                    };

                    requests.fetch_add(1, Ordering::SeqCst);
                    let Ok(mut msg) = SnmpMessage::parse(&buf[..len]) else {
                        continue;
                    };

                    // record the community exactly as forwarded
                    let forwarded = format!("{}{}", msg.community(), msg.community_index());
                    communities.lock().unwrap().push(forwarded);

                    msg.set_pdu_type(PduType::GetResponse);
                    msg.set_data(tail.clone());
                    let _ = socket.send_to(&msg.serialize(), peer).await;
                }
            }
        });

        Self {
            addr,
            communities,
            requests,
            cancel,
            _task: task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of datagrams received.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Communities of all forwarded requests, suffix re-attached.
    pub fn communities(&self) -> Vec<String> {
        self.communities.lock().unwrap().clone()
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A backend that receives requests but never replies.
pub struct SilentBackend {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl SilentBackend {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let requests = requests.clone();
            let cancel = cancel.clone();
            async move {
                let mut buf = vec![0u8; 65536];
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = socket.recv_from(&mut buf) => {
                            if result.is_err() {
                                break;
                            }
                            requests.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        });

        Self {
            addr,
            requests,
            cancel,
            _task: task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for SilentBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A backend that answers with bytes that are not SNMP at all.
pub struct GarbageBackend {
    addr: SocketAddr,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl GarbageBackend {
    pub async fn with_reply(reply: &'static [u8]) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut buf = vec![0u8; 65536];
                loop {
                    let (_, peer) = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = socket.recv_from(&mut buf) => match result {
                            Ok(received) => received,
                            Err(_) => break,
                        },
                    };
                    let _ = socket.send_to(reply, peer).await;
                }
            }
        });

        Self {
            addr,
            cancel,
            _task: task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for GarbageBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
