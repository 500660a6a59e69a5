//! Network reachability collaborator

use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpStream;
use tracing::debug;

use crate::BoxFuture;

/// "Is the network up" probe consulted before anything that needs it.
pub trait Reachability: Send + Sync {
    fn is_available(&self) -> BoxFuture<'_, bool>;
}

/// Reachability by TCP connect to a known host, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// `addr` is `host:port`.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Probe the host of `url` on its (possibly implied) port.
    pub fn for_url(url: &str, timeout: Duration) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{host}:{port}"), timeout))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "reachability probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, timeout_ms = self.timeout.as_millis() as u64, "reachability probe timed out");
                false
            }
        }
    }
}

impl Reachability for TcpProbe {
    fn is_available(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.probe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reachable_when_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.is_available().await);
    }

    #[tokio::test]
    async fn unreachable_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(!probe.is_available().await);
    }

    #[test]
    fn for_url_uses_scheme_default_port() {
        let probe = TcpProbe::for_url("https://login.example.com/tenant", Duration::from_secs(3)).unwrap();
        assert_eq!(probe.addr(), "login.example.com:443");

        let probe = TcpProbe::for_url("http://127.0.0.1:8080", Duration::from_secs(3)).unwrap();
        assert_eq!(probe.addr(), "127.0.0.1:8080");

        assert!(TcpProbe::for_url("not a url", Duration::from_secs(3)).is_none());
    }
}
