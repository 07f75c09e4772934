//! snmp-cache-proxy: caching SNMPv2c proxy.
//!
//! Routes requests to the backend named by the client's community
//! string and caches responses under a TTL.

use clap::Parser;
use snmp_cache_proxy::Proxy;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Caching SNMPv2c proxy that routes requests by community string.
#[derive(Debug, Parser)]
#[command(name = "snmp-cache-proxy", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value = "161")]
    port: u16,

    /// Community to query on backend devices.
    #[arg(long)]
    backend_community: String,

    /// Timeout, in seconds, for querying backends.
    #[arg(long, default_value = "2")]
    backend_timeout_sec: u64,

    /// Number of retries for querying backends.
    #[arg(long, default_value = "2")]
    num_backend_retries: u32,

    /// Time-to-live, in seconds, for cache entries.
    #[arg(long, default_value = "300")]
    cache_ttl_sec: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let proxy = match Proxy::builder(&args.backend_community)
        .bind(format!("0.0.0.0:{}", args.port))
        .backend_timeout(Duration::from_secs(args.backend_timeout_sec))
        .backend_retries(args.num_backend_retries)
        .cache_ttl(Duration::from_secs(args.cache_ttl_sec))
        .build()
    {
        Ok(proxy) => proxy,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = proxy.cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    match proxy.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
