//! # snmp-cache-proxy
//!
//! Caching SNMPv2c proxy that routes requests by community string.
//!
//! Clients address a backend device by putting its DNS name or address
//! in the community field of an ordinary SNMPv2c request (optionally
//! with an `@index` context suffix, e.g. `sw1.example@vlan10`). The
//! proxy resolves the name, forwards the request with the configured
//! real community, caches the response tail under a TTL, and echoes the
//! client's request ID back bit-exactly. Identical requests within the
//! TTL are answered from the cache; a backend that stays silent through
//! all retries is answered with a cached `resourceUnavailable` error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snmp_cache_proxy::Proxy;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> snmp_cache_proxy::Result<()> {
//!     let proxy = Proxy::builder("public")
//!         .bind("0.0.0.0:161")
//!         .backend_timeout(Duration::from_secs(2))
//!         .backend_retries(2)
//!         .cache_ttl(Duration::from_secs(300))
//!         .build()?;
//!
//!     proxy.run().await
//! }
//! ```

pub mod backend;
pub mod ber;
pub mod cache;
pub mod error;
pub mod message;
pub mod proxy;

// Re-exports for convenience
pub use backend::BackendClient;
pub use cache::{CacheKey, ResponseCache};
pub use error::{Error, Result};
pub use message::{PduType, RESOURCE_UNAVAILABLE, SnmpMessage};
pub use proxy::{Proxy, ProxyBuilder, SNMP_PORT};
