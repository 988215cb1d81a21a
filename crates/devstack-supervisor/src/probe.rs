use std::time::Duration;

use async_trait::async_trait;

use crate::spec::ProbeTarget;

/// Readiness and port checks. A `false` answer always means "not yet", never an error.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &ProbeTarget) -> bool;

    /// True when something accepts TCP connections on the local port.
    async fn port_listening(&self, port: u16) -> bool;
}

#[derive(Debug, Clone)]
pub struct NetProbe {
    http: reqwest::Client,
    timeout: Duration,
}

impl NetProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, timeout })
    }

    async fn tcp(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    async fn http(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                if !ok {
                    tracing::debug!(%url, status = %resp.status(), "health endpoint not ready");
                }
                ok
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "health endpoint unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl Probe for NetProbe {
    async fn check(&self, target: &ProbeTarget) -> bool {
        match target {
            ProbeTarget::Tcp { host, port } => self.tcp(host, *port).await,
            ProbeTarget::Http { url, .. } => self.http(url).await,
            ProbeTarget::None => true,
        }
    }

    async fn port_listening(&self, port: u16) -> bool {
        self.tcp("127.0.0.1", port).await
    }
}
