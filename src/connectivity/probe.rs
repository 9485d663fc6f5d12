//! Reachability probes

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Timeout for a single probe round trip
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A pluggable reachability check
pub trait ConnectivityProbe: Send + Sync + 'static {
    /// Returns true when the network looks usable right now
    fn check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Probes the backend base URL with a short GET.
///
/// Any HTTP response, including an error status, proves the network path
/// is up; backend health is judged by the AI client, not here. Only
/// transport failures (DNS, connect, timeout) count as offline.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl ConnectivityProbe for HttpProbe {
    fn check(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            self.client.get(&self.url).send().await.is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response and return the base URL
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_server_error_still_counts_as_reachable() {
        let url = serve_once("500 Internal Server Error").await;
        let probe = HttpProbe::new(&url).unwrap();
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn test_rate_limited_backend_still_counts_as_reachable() {
        let url = serve_once("429 Too Many Requests").await;
        let probe = HttpProbe::new(&url).unwrap();
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn test_connection_refused_is_offline() {
        // Bind to grab a free port, then drop so connections are refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(&format!("http://{}", addr)).unwrap();
        assert!(!probe.check().await);
    }
}
