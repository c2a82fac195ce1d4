// Network seam: one GET per call, exposed as a byte stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use manifest::ByteRange;
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};
use url::Url;

use crate::client::{ClientConfig, create_client};
use crate::error::StreamError;
use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

/// Response body. Dropping it aborts the request.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub range: Option<ByteRange>,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self { url, range: None }
    }

    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.range = range;
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens `request` and returns its body once the response is available.
    async fn fetch(&self, request: FetchRequest) -> Result<ByteStream, StreamError>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    params: Vec<(String, String)>,
    retry_policy: RetryPolicy,
    token: CancellationToken,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, StreamError> {
        Ok(Self::with_client(create_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            params: config.params.clone(),
            retry_policy: config.retry_policy.clone(),
            token: CancellationToken::new(),
        }
    }

    /// Stops pending retries when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    async fn attempt(&self, request: &FetchRequest, attempt: u32) -> RetryAction<Response> {
        let mut builder = self.client.get(request.url.clone()).query(&self.params);
        if let Some(range) = request.range {
            builder = builder.header(reqwest::header::RANGE, range.header_value());
        }

        match builder.send().await {
            Ok(response) if response.status().is_success() => {
                trace!(
                    attempt,
                    status = %response.status(),
                    http_version = ?response.version(),
                    "Response received"
                );
                RetryAction::Success(response)
            }
            Ok(response) => {
                let err = StreamError::http(response.status(), request.url.as_str());
                if err.is_retryable() {
                    RetryAction::Retry(err)
                } else {
                    RetryAction::Fail(err)
                }
            }
            Err(e) if is_retryable_reqwest_error(&e) => RetryAction::Retry(e.into()),
            Err(e) => RetryAction::Fail(e.into()),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url, range = ?request.range))]
    async fn fetch(&self, request: FetchRequest) -> Result<ByteStream, StreamError> {
        let response = retry_with_backoff(&self.retry_policy, &self.token, |attempt| {
            self.attempt(&request, attempt)
        })
        .await?;

        Ok(response.bytes_stream().map_err(StreamError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_range() {
        let url = Url::parse("http://a.b/seg.ts").unwrap();
        let request = FetchRequest::new(url.clone()).with_range(Some(ByteRange::new(10, 19)));
        assert_eq!(request.url, url);
        assert_eq!(request.range.unwrap().header_value(), "bytes=10-19");
        assert_eq!(FetchRequest::new(url).range, None);
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_retry_budget() {
        let config = ClientConfig {
            use_system_proxy: false,
            retry_policy: RetryPolicy::none(),
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let url = Url::parse("http://127.0.0.1:9/playlist.m3u8").unwrap();
        let result = transport.fetch(FetchRequest::new(url)).await;
        assert!(matches!(result, Err(StreamError::Network { .. })));
    }

    #[tokio::test]
    async fn stopped_stream_makes_no_request() {
        let token = CancellationToken::new();
        let config = ClientConfig {
            use_system_proxy: false,
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(&config)
            .unwrap()
            .with_cancellation(token.clone());
        token.cancel();

        let url = Url::parse("http://127.0.0.1:9/playlist.m3u8").unwrap();
        let result = transport.fetch(FetchRequest::new(url)).await;
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }
}
