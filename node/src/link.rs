use crate::errors::{Error, Result};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{info, warn};

/// Network association as seen by the scheduler.
pub trait Link {
    fn is_connected(&self) -> bool;
}

/// Association with the collector's network on a host with a regular IP stack.
///
/// Connectivity is a route check: connecting a UDP socket asks the kernel for
/// a route to the collector without putting anything on the wire.
#[derive(Debug, Clone)]
pub struct HostLink {
    collector: SocketAddr,
}

impl HostLink {
    pub fn collector(&self) -> SocketAddr {
        self.collector
    }
}

impl Link for HostLink {
    fn is_connected(&self) -> bool {
        let local = if self.collector.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        UdpSocket::bind(local)
            .and_then(|socket| socket.connect(self.collector))
            .is_ok()
    }
}

/// Resolve the collector and confirm a route to it, retrying a bounded number
/// of times. Failing here is the one error the node does not survive.
pub async fn associate(collector_url: &str, attempts: u32, wait: Duration) -> Result<HostLink> {
    let url = reqwest::Url::parse(collector_url)
        .map_err(|e| Error::Config(format!("Invalid collector URL '{}': {}", collector_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("Collector URL has no host: {}", collector_url)))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    for attempt in 1..=attempts {
        match resolve(&host, port, wait).await {
            Ok(collector) => {
                let link = HostLink { collector };
                if link.is_connected() {
                    info!("Associated, collector at {}", collector);
                    return Ok(link);
                }
                warn!("No route to {} (attempt {}/{})", collector, attempt, attempts);
            }
            Err(e) => warn!(
                "Could not resolve {} (attempt {}/{}): {}",
                host, attempt, attempts, e
            ),
        }

        if attempt < attempts {
            tokio::time::sleep(wait).await;
        }
    }

    Err(Error::NetworkUnavailable)
}

async fn resolve(host: &str, port: u16, timeout: Duration) -> Result<SocketAddr> {
    let lookup = tokio::net::lookup_host((host, port));
    let mut addrs = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| Error::NetworkUnavailable)??;
    addrs.next().ok_or(Error::NetworkUnavailable)
}
