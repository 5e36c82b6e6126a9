//! Document fetchers

use crate::config::DEFAULT_FETCH_TIMEOUT;
use anyhow::{anyhow, Result};
use std::time::Duration;

/// Retrieves the raw document published at a URL
///
/// Calls are blocking; the scheduler runs them on the blocking thread pool.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP fetcher with a global per-request timeout
///
/// Non-2xx responses are errors.
pub struct HttpFetcher {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .user_agent(concat!("escrutinio/", env!("CARGO_PKG_VERSION")))
            .build()
            .into();
        Self { agent, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| anyhow!("Failed to fetch {}: {}", url, e))?;

        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(HttpFetcher::default().timeout(), DEFAULT_FETCH_TIMEOUT);
        assert_eq!(
            HttpFetcher::new(Duration::from_secs(2)).timeout(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_unreachable_host_is_an_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2));
        let err = fetcher.fetch("http://127.0.0.1:1/info.json").unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[cfg(feature = "server")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_error_status_is_an_error() {
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::Router;

        let app = Router::new()
            .route("/ES/info.json", get(|| async { "{}" }))
            .route(
                "/ES/CA02/info.json",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let base = format!("http://{}", addr);
        let (found, unavailable, missing) = tokio::task::spawn_blocking(move || {
            let fetcher = HttpFetcher::new(Duration::from_secs(5));
            (
                fetcher.fetch(&format!("{}/ES/info.json", base)),
                fetcher.fetch(&format!("{}/ES/CA02/info.json", base)),
                fetcher.fetch(&format!("{}/ES/CA99/info.json", base)),
            )
        })
        .await
        .unwrap();

        assert_eq!(found.unwrap(), b"{}".to_vec());
        assert!(unavailable.unwrap_err().to_string().contains("503"));
        assert!(missing.unwrap_err().to_string().contains("404"));

        server.abort();
    }
}
