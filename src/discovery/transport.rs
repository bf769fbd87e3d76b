//! Network primitives used by the host prober.
//!
//! Every call is bounded by its own timeout and absorbs its own errors: a
//! failure is reported as a negative signal (`false` / `None`), never as an
//! error, so one misbehaving host cannot abort the rest of a scan.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::Result;
use crate::http::{build_camera_http_client, HttpReply};

/// ICMP echo payload size.
const PING_PAYLOAD: usize = 56;

/// Reachability and fingerprint primitives.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Single ICMP echo; `true` when a reply arrives within `limit`.
    async fn ping(&self, ip: Ipv4Addr, limit: Duration) -> bool;

    /// HTTP GET; `None` on any transport error or timeout.
    async fn http_get(&self, url: &str, limit: Duration) -> Option<HttpReply>;

    /// Raw TCP connect; `true` when the handshake completes within `limit`.
    async fn tcp_connect(&self, addr: SocketAddrV4, limit: Duration) -> bool;
}

/// Real network transport: `surge-ping`, permissive `reqwest`, tokio TCP.
pub struct NetTransport {
    http: Client,
}

impl NetTransport {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        Ok(NetTransport { http: build_camera_http_client(http_timeout)? })
    }

    async fn get_reply(&self, url: &str, limit: Duration) -> Result<HttpReply> {
        let resp = self.http.get(url).timeout(limit).send().await?;
        HttpReply::read(resp).await
    }
}

#[async_trait]
impl ProbeTransport for NetTransport {
    async fn ping(&self, ip: Ipv4Addr, limit: Duration) -> bool {
        let payload = [0u8; PING_PAYLOAD];
        match timeout(limit, surge_ping::ping(IpAddr::V4(ip), &payload)).await {
            Ok(Ok((_packet, rtt))) => {
                debug!("ping {ip}: reply in {rtt:?}");
                true
            }
            Ok(Err(e)) => {
                debug!("ping {ip} failed: {e}");
                false
            }
            Err(_) => false,
        }
    }

    async fn http_get(&self, url: &str, limit: Duration) -> Option<HttpReply> {
        match timeout(limit, self.get_reply(url, limit)).await {
            Ok(Ok(reply)) => {
                debug!("GET {url} → {}", reply.status);
                Some(reply)
            }
            Ok(Err(e)) => {
                debug!("GET {url} failed: {e}");
                None
            }
            Err(_) => {
                debug!("GET {url} timed out");
                None
            }
        }
    }

    async fn tcp_connect(&self, addr: SocketAddrV4, limit: Duration) -> bool {
        matches!(
            timeout(limit, TcpStream::connect(SocketAddr::V4(addr))).await,
            Ok(Ok(_))
        )
    }
}
