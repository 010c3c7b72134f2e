use crate::error::ProbeError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

/// Measures reachability of `target` through a local SOCKS endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns the round-trip latency in whole milliseconds.
    async fn probe(&self, socks: SocketAddr, target: &str, timeout: Duration) -> Result<u64, ProbeError>;
    fn name(&self) -> &'static str;
}
