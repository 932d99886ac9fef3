//! HTTP transport abstraction for testability.
//!
//! The fetcher owns retry and absence semantics, so the transport stays
//! deliberately thin: one GET, returning status and body without judging
//! them. This abstraction allows dependency injection of scripted
//! transports in tests.

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;
use tracing::{trace, warn};

/// A raw HTTP response: status code plus body bytes.
///
/// Carrying the status out lets the caller distinguish confirmed absence
/// (404) from retry candidates (everything else non-2xx).
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Transport-level failure: connect, timeout, or body-read errors.
///
/// All transport errors are retry candidates; permanence is only ever
/// signalled through a status code.
#[derive(Debug, Clone, Error)]
#[error("request failed: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Trait for asynchronous tile GET operations.
pub trait TileTransport: Send + Sync {
    /// Performs an async HTTP GET request.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    ///
    /// # Returns
    ///
    /// The response status and body, or a transport error.
    fn get(&self, url: &str) -> impl Future<Output = Result<TileResponse, TransportError>> + Send;
}

/// Identifying User-Agent for tile requests.
/// Feature tile servers generally expect clients to identify themselves.
const DEFAULT_USER_AGENT: &str = concat!("tilestitch/", env!("CARGO_PKG_VERSION"));

/// Real transport implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given per-request timeout.
    ///
    /// Connection pooling is tuned for a steady trickle of tile requests:
    /// warm keepalive connections, but nothing like a bulk-download pool.
    pub fn new(timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::new(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl TileTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TileResponse, TransportError> {
        trace!(url = url, "tile GET starting");

        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    url = url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "tile GET failed"
                );
                return Err(TransportError::new(format!("request failed: {}", e)));
            }
        };

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("failed to read response body: {}", e)))?;

        trace!(url = url, status = status, bytes = body.len(), "tile GET complete");
        Ok(TileResponse { status, body })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport replaying a queue of canned responses.
    ///
    /// Counts every call so tests can assert exactly how many network
    /// attempts a fetch made.
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TileResponse, TransportError>>>,
        fallback: Option<TileResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Result<TileResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback: None,
                calls: AtomicUsize::new(0),
            }
        }

        /// Convenience: a transport that always answers with this status/body.
        pub fn always(status: u16, body: Vec<u8>) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Some(TileResponse {
                    status,
                    body: Bytes::from(body),
                }),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileTransport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<TileResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().pop_front() {
                Some(response) => response,
                None => match &self.fallback {
                    Some(resp) => Ok(resp.clone()),
                    None => Err(TransportError::new("script exhausted")),
                },
            }
        }
    }

    #[tokio::test]
    async fn test_scripted_transport_replays_in_order() {
        let transport = ScriptedTransport::new(vec![
            Ok(TileResponse {
                status: 500,
                body: Bytes::new(),
            }),
            Ok(TileResponse {
                status: 200,
                body: Bytes::from_static(b"data"),
            }),
        ]);

        assert_eq!(transport.get("http://x").await.unwrap().status, 500);
        assert_eq!(transport.get("http://x").await.unwrap().status, 200);
        assert_eq!(transport.calls(), 2);
    }
}
