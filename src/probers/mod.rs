pub mod curl;
pub mod http;

use crate::configuration::{ProbeKind, ProbeSettings};
use crate::prober::Prober;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;

/// Client routed through the engine's SOCKS endpoint, with remote DNS.
pub fn new_client(socks: SocketAddr, timeout: Duration) -> reqwest::Result<Client> {
    let proxy = reqwest::Proxy::all(format!("socks5h://{}", socks))?;
    Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .pool_max_idle_per_host(0) // every probe goes through a different engine
        .build()
}

pub fn from_settings(settings: &ProbeSettings) -> Box<dyn Prober> {
    match settings.kind {
        ProbeKind::Curl => Box::new(curl::CurlProber::new(settings.curl_path.clone())),
        ProbeKind::Http => Box::new(http::HttpProber::new()),
    }
}
