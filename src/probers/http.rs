use super::new_client;
use crate::error::ProbeError;
use crate::prober::Prober;
use async_trait::async_trait;
use log::debug;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Any HTTP response counts as reachable, as with curl without `--fail`.
#[derive(Debug, Default)]
pub struct HttpProber;

impl HttpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, socks: SocketAddr, target: &str, timeout: Duration) -> Result<u64, ProbeError> {
        let client = new_client(socks, timeout)
            .map_err(|e| ProbeError::Connect(format!("cannot build client for {}: {}", socks, e)))?;
        let url = target_url(target);

        let start = Instant::now();
        let request = async {
            let resp = client.get(&url).send().await?;
            let status = resp.status();
            resp.bytes().await?;
            Ok::<_, reqwest::Error>(status)
        };
        let status = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) if e.is_timeout() => return Err(ProbeError::Timeout(timeout)),
            Ok(Err(e)) => return Err(ProbeError::Connect(e.to_string())),
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };
        let elapsed = start.elapsed();
        debug!("{} answered {} via {} in {:?}", url, status, socks, elapsed);

        u64::try_from(elapsed.as_millis())
            .map_err(|_| ProbeError::Parse(format!("elapsed time {:?} out of range", elapsed)))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn target_url(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}
