use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// Reported once per segment fully forwarded to the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 1-based ordinal of the segment in output order.
    pub num: u64,
    /// Bytes forwarded for this segment.
    pub size: u64,
    pub duration_ms: f64,
    /// Absolute segment URL.
    pub url: String,
    /// Segments queued so far, including this one.
    pub total_segments: usize,
    /// Bytes forwarded so far, including this segment.
    pub downloaded_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(Bytes),
    Progress(Progress),
}

/// Consumer side of a running segment stream.
///
/// Yields data and progress in output order. A failure is yielded once as the
/// last item; a normal end is the end of the stream. Dropping the handle stops
/// the engine.
#[derive(Debug)]
pub struct SegmentStream {
    events: ReceiverStream<Result<StreamEvent, StreamError>>,
    token: CancellationToken,
}

impl SegmentStream {
    pub(crate) fn new(
        events: mpsc::Receiver<Result<StreamEvent, StreamError>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            events: ReceiverStream::new(events),
            token,
        }
    }

    /// Stops fetching and closes the output without an error. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Token observed by the engine; cancelling it is the same as [`Self::stop`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drains the stream, concatenating all data.
    pub async fn collect_bytes(mut self) -> Result<Bytes, StreamError> {
        let mut buffer = BytesMut::new();
        while let Some(event) = self.next().await {
            if let StreamEvent::Data(chunk) = event? {
                buffer.extend_from_slice(&chunk);
            }
        }
        Ok(buffer.freeze())
    }

    /// Adapts the data part of the stream into an [`AsyncRead`]; progress is
    /// discarded and a failure surfaces as an I/O error.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.filter_map(|event| {
            futures::future::ready(match event {
                Ok(StreamEvent::Data(chunk)) => Some(Ok(chunk)),
                Ok(StreamEvent::Progress(_)) => None,
                Err(e) => Some(Err(io::Error::other(e))),
            })
        }))
    }
}

impl Stream for SegmentStream {
    type Item = Result<StreamEvent, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for SegmentStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn progress(num: u64) -> StreamEvent {
        StreamEvent::Progress(Progress {
            num,
            size: 1,
            duration_ms: 0.0,
            url: String::new(),
            total_segments: 1,
            downloaded_bytes: num,
        })
    }

    fn stream_of(items: Vec<Result<StreamEvent, StreamError>>) -> SegmentStream {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        SegmentStream::new(rx, CancellationToken::new())
    }

    #[tokio::test]
    async fn collects_data_and_skips_progress() {
        let stream = stream_of(vec![
            Ok(StreamEvent::Data(Bytes::from_static(b"ab"))),
            Ok(progress(1)),
            Ok(StreamEvent::Data(Bytes::from_static(b"c"))),
        ]);
        assert_eq!(stream.collect_bytes().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn collect_surfaces_error() {
        let stream = stream_of(vec![
            Ok(StreamEvent::Data(Bytes::from_static(b"ab"))),
            Err(StreamError::Cancelled),
        ]);
        assert!(matches!(
            stream.collect_bytes().await,
            Err(StreamError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn reads_as_async_read() {
        let stream = stream_of(vec![
            Ok(StreamEvent::Data(Bytes::from_static(b"one"))),
            Ok(progress(1)),
            Ok(StreamEvent::Data(Bytes::from_static(b"two"))),
        ]);
        let mut reader = stream.into_async_read();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "onetwo");
    }

    #[tokio::test]
    async fn stop_and_drop_cancel_the_token() {
        let stream = stream_of(vec![]);
        let token = stream.cancellation_token();
        stream.stop();
        stream.stop();
        assert!(token.is_cancelled());

        let stream = stream_of(vec![]);
        let token = stream.cancellation_token();
        drop(stream);
        assert!(token.is_cancelled());
    }
}
