//! segstream: HLS / DASH manifests in, one ordered byte stream out.
//!
//! ```no_run
//! # async fn demo() -> Result<(), segstream::StreamError> {
//! let config = segstream::StreamConfig::builder().chunk_readahead(4).build()?;
//! let stream = segstream::open(
//!     "https://example.com/live/index.m3u8",
//!     config,
//!     &segstream::ClientConfig::default(),
//! )?;
//! let _bytes = stream.collect_bytes().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod proxy;
pub mod queue;
pub mod retry;
pub mod stream;
pub mod transport;
mod window;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

// Export common types for ease of use
pub use client::{ClientConfig, create_client};
pub use config::{Begin, StreamConfig, StreamConfigBuilder};
pub use error::StreamError;
pub use manifest::{ManifestKind, ParseError, Segment, parse_human_time};
pub use orchestrator::StreamOrchestrator;
pub use proxy::{ProxyAuth, ProxyConfig, ProxyScheme};
pub use queue::{BoundedQueue, Ticket};
pub use retry::RetryPolicy;
pub use stream::{Progress, SegmentStream, StreamEvent};
pub use transport::{ByteStream, FetchRequest, HttpTransport, Transport};

/// Streams `manifest_url` over HTTP. Must be called within a tokio runtime.
///
/// Stopping the stream also abandons any request backoff in progress.
pub fn open(
    manifest_url: &str,
    config: StreamConfig,
    client: &ClientConfig,
) -> Result<SegmentStream, StreamError> {
    let token = CancellationToken::new();
    let transport = HttpTransport::new(client)?.with_cancellation(token.clone());
    StreamOrchestrator::spawn_with_token(manifest_url, config, Arc::new(transport), token)
}

/// Streams `manifest_url` through a caller supplied transport.
pub fn open_with_transport(
    manifest_url: &str,
    config: StreamConfig,
    transport: Arc<dyn Transport>,
) -> Result<SegmentStream, StreamError> {
    StreamOrchestrator::spawn(manifest_url, config, transport)
}
