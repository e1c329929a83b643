//! HTTP client abstraction for the worker contract.
//!
//! Workers expose two endpoints on their local port:
//!
//! - `GET /health` - 200 means the worker finished initializing.
//! - `GET /calculate/{input}` - body is the decimal ASCII result.
//!
//! The [`WorkerApi`] trait allows dependency injection so tests can drive a
//! [`WorkerSession`](crate::worker::WorkerSession) without a real container.

use crate::worker::WorkerError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

/// The worker's HTTP contract.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Probes the worker's health endpoint, returning the HTTP status code.
    async fn health(&self, port: u16) -> Result<u16, WorkerError>;

    /// Requests a calculation, returning the raw response body.
    async fn calculate(&self, port: u16, input: u64) -> Result<String, WorkerError>;
}

/// Real worker client implementation using reqwest.
#[derive(Clone)]
pub struct HttpWorkerApi {
    client: reqwest::Client,
}

impl HttpWorkerApi {
    /// Creates a new client with the given request timeout.
    ///
    /// The timeout bounds the whole calculation call; workers answer slowly
    /// right after boot, so callers should pass the same ceiling used for
    /// initialization.
    pub fn new(timeout: Duration) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Http(format!("cannot create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerApi for HttpWorkerApi {
    async fn health(&self, port: u16) -> Result<u16, WorkerError> {
        let url = format!("http://127.0.0.1:{}/health", port);
        trace!(url = %url, "health probe");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WorkerError::Http(format!("health probe failed: {}", e)))?;

        Ok(response.status().as_u16())
    }

    async fn calculate(&self, port: u16, input: u64) -> Result<String, WorkerError> {
        let url = format!("http://127.0.0.1:{}/calculate/{}", port, input);
        trace!(url = %url, "calculation request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WorkerError::Http(format!("cannot do request: {}", e)))?;

        if !response.status().is_success() {
            return Err(WorkerError::Http(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| WorkerError::Http(format!("cannot read body: {}", e)))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Mock worker API for testing.
    ///
    /// Returns the configured responses on every call.
    #[derive(Clone)]
    pub struct MockWorkerApi {
        pub health: Result<u16, WorkerError>,
        pub body: Result<String, WorkerError>,
    }

    impl MockWorkerApi {
        /// A healthy worker answering every calculation with `body`.
        pub fn healthy(body: &str) -> Self {
            Self {
                health: Ok(200),
                body: Ok(body.to_string()),
            }
        }
    }

    #[async_trait]
    impl WorkerApi for MockWorkerApi {
        async fn health(&self, _port: u16) -> Result<u16, WorkerError> {
            self.health.clone()
        }

        async fn calculate(&self, _port: u16, _input: u64) -> Result<String, WorkerError> {
            self.body.clone()
        }
    }

    #[tokio::test]
    async fn test_mock_api_healthy() {
        let mock = MockWorkerApi::healthy("2");

        assert_eq!(mock.health(9090).await.unwrap(), 200);
        assert_eq!(mock.calculate(9090, 1).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_mock_api_error() {
        let mock = MockWorkerApi {
            health: Err(WorkerError::Http("connection refused".to_string())),
            body: Ok("1".to_string()),
        };

        assert!(mock.health(9090).await.is_err());
    }
}
