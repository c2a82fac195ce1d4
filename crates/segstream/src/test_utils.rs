// Scripted in-memory transport for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use manifest::ByteRange;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::error::StreamError;
use crate::transport::{ByteStream, FetchRequest, Transport};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    chunks: Vec<Bytes>,
    delay: Duration,
    status: Option<StatusCode>,
}

impl MockResponse {
    pub fn body(body: &str) -> Self {
        Self::chunks(&[body])
    }

    pub fn chunks(parts: &[&str]) -> Self {
        Self {
            chunks: parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
            delay: Duration::ZERO,
            status: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            chunks: Vec::new(),
            delay: Duration::ZERO,
            status: Some(status),
        }
    }

    /// Delays the response headers by `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub url: String,
    pub range: Option<ByteRange>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    routes: HashMap<String, VecDeque<MockResponse>>,
    calls: Vec<MockCall>,
    pulled: HashMap<String, usize>,
}

/// Answers requests from per-URL scripts. Each call consumes the next
/// response of its URL; the last one is repeated. Unknown URLs get a 404.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, response: MockResponse) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .entry(url.to_owned())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }

    /// Body chunks of `url` read by the caller so far.
    pub fn chunks_pulled(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .pulled
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<ByteStream, StreamError> {
        let url = request.url.to_string();
        let response = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(MockCall {
                url: url.clone(),
                range: request.range,
                at: Instant::now(),
            });
            match state.routes.get_mut(&url) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };

        let Some(response) = response else {
            return Err(StreamError::http(StatusCode::NOT_FOUND, url));
        };
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        if let Some(status) = response.status {
            return Err(StreamError::http(status, url));
        }
        let state = Arc::clone(&self.state);
        Ok(stream::iter(response.chunks)
            .map(move |chunk| {
                *state.lock().unwrap().pulled.entry(url.clone()).or_default() += 1;
                Ok(chunk)
            })
            .boxed())
    }
}
