// Stream orchestrator: manifest rounds in, ordered segment bytes out.
//
// One control task owns all state. Network work runs in spawned pumps that
// report back over channels, so no state is shared or locked.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use manifest::{ManifestParser, ParserEvent, Segment};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use url::Url;

use crate::config::{Begin, StreamConfig};
use crate::error::StreamError;
use crate::queue::{BoundedQueue, Ticket};
use crate::stream::{Progress, SegmentStream, StreamEvent};
use crate::transport::{ByteStream, FetchRequest, Transport};
use crate::window::{ManifestWindow, TimedSegment, Timeline};

const OUTPUT_CHANNEL_CAPACITY: usize = 32;

/// Body chunks a readahead fetch may hold before it stops reading.
const SEGMENT_CHANNEL_CAPACITY: usize = 4;

type Chunk = Result<Bytes, StreamError>;

/// A segment request that failed, with the URL it was for.
type FetchFailure = (String, StreamError);

/// A started fetch waiting for its turn at the output.
struct OutputTask {
    fetch_ticket: Ticket,
    segment: Segment,
    url: Url,
    chunks: mpsc::Receiver<Bytes>,
}

/// The output task currently being forwarded.
struct ActiveOutput {
    ticket: Ticket,
    task: OutputTask,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Ended,
}

pub struct StreamOrchestrator {
    manifest_url: Url,
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
    output: mpsc::Sender<Result<StreamEvent, StreamError>>,
    // Fetch failures skip the output queue and abort at once.
    failures: mpsc::UnboundedReceiver<FetchFailure>,
    failure_tx: mpsc::UnboundedSender<FetchFailure>,

    fetch_queue: BoundedQueue<TimedSegment>,
    output_queue: BoundedQueue<OutputTask>,
    current: Option<ActiveOutput>,

    parser: ManifestParser,
    manifest: Option<ByteStream>,
    timeline: Timeline,
    window: ManifestWindow,

    fetching_manifest: bool,
    is_static: bool,
    refresh_timer: Option<Pin<Box<Sleep>>>,
    refresh_threshold: usize,
    min_refresh_interval: Duration,
    last_refresh: Instant,

    segment_number: u64,
    downloaded: u64,
}

impl StreamOrchestrator {
    /// Starts streaming `manifest_url` on the current tokio runtime.
    pub fn spawn(
        manifest_url: &str,
        config: StreamConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<SegmentStream, StreamError> {
        Self::spawn_with_token(manifest_url, config, transport, CancellationToken::new())
    }

    /// Like [`Self::spawn`], with `token` as the stream's stop signal. The
    /// transport may observe the same token.
    pub(crate) fn spawn_with_token(
        manifest_url: &str,
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        token: CancellationToken,
    ) -> Result<SegmentStream, StreamError> {
        config.validate()?;
        let manifest_url = Url::parse(manifest_url)
            .map_err(|e| StreamError::invalid_url(manifest_url, e.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let orchestrator = Self::new(manifest_url, config, transport, token.clone(), tx);
        tokio::spawn(orchestrator.run());
        Ok(SegmentStream::new(rx, token))
    }

    fn new(
        manifest_url: Url,
        config: StreamConfig,
        transport: Arc<dyn Transport>,
        token: CancellationToken,
        output: mpsc::Sender<Result<StreamEvent, StreamError>>,
    ) -> Self {
        let live_buffer_ms = config.live_buffer.as_secs_f64() * 1000.0;
        let timeline = match &config.begin {
            Begin::Start => Timeline::new(0.0, false),
            Begin::Absolute(ms) => Timeline::new((*ms as f64 - live_buffer_ms).max(0.0), false),
            Begin::Relative(ms) => Timeline::new(*ms as f64, true),
            Begin::Now => {
                let now = chrono::Utc::now().timestamp_millis() as f64;
                Timeline::new((now - live_buffer_ms).max(0.0), false)
            }
        };

        let (failure_tx, failures) = mpsc::unbounded_channel();

        Self {
            failures,
            failure_tx,
            parser: ManifestParser::for_kind(&config.kind, manifest_url.as_str()),
            window: ManifestWindow::new(config.live_buffer),
            fetch_queue: BoundedQueue::new(config.chunk_readahead),
            output_queue: BoundedQueue::new(1),
            current: None,
            manifest: None,
            timeline,
            fetching_manifest: false,
            is_static: false,
            refresh_timer: None,
            refresh_threshold: 1,
            min_refresh_interval: Duration::ZERO,
            last_refresh: Instant::now(),
            segment_number: 0,
            downloaded: 0,
            manifest_url,
            config,
            transport,
            token,
            output,
        }
    }

    async fn run(mut self) {
        info!(
            url = %self.manifest_url,
            dash = self.parser.is_dash(),
            readahead = self.config.chunk_readahead,
            "Segment stream started"
        );
        self.start_manifest_fetch();
        let result = self.drive().await;
        self.shutdown(result).await;
    }

    async fn drive(&mut self) -> Result<(), StreamError> {
        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    return Err(StreamError::Cancelled);
                }

                Some((url, e)) = self.failures.recv() => {
                    return Err(StreamError::segment_fetch(url, e));
                }

                chunk = next_segment_chunk(&mut self.current), if self.current.is_some() => {
                    if self.on_segment_chunk(chunk).await? == Flow::Ended {
                        return Ok(());
                    }
                }

                chunk = next_manifest_chunk(&mut self.manifest), if self.manifest.is_some() => {
                    if self.on_manifest_chunk(chunk)? == Flow::Ended {
                        return Ok(());
                    }
                }

                _ = refresh_due(&mut self.refresh_timer), if self.refresh_timer.is_some() => {
                    self.refresh_timer = None;
                    self.start_manifest_fetch();
                }
            }
        }
    }

    /// Tears everything down and closes the output. Runs exactly once.
    async fn shutdown(mut self, result: Result<(), StreamError>) {
        self.token.cancel();
        self.fetch_queue.die();
        self.output_queue.die();
        self.refresh_timer = None;
        self.manifest = None;
        self.current = None;

        match result {
            Ok(()) => info!(
                segments = self.segment_number,
                bytes = self.downloaded,
                "Segment stream ended"
            ),
            Err(StreamError::Cancelled) => info!(
                segments = self.segment_number,
                bytes = self.downloaded,
                "Segment stream stopped"
            ),
            Err(e) => {
                error!(error = %e, "Segment stream aborted");
                let _ = self.output.send(Err(e)).await;
            }
        }
        // Dropping `self` drops the sender, which closes the output.
    }

    fn start_manifest_fetch(&mut self) {
        debug!(url = %self.manifest_url, "Fetching manifest");
        self.last_refresh = Instant::now();
        self.fetching_manifest = true;
        self.parser = ManifestParser::for_kind(&self.config.kind, self.manifest_url.as_str());
        self.window = ManifestWindow::new(self.config.live_buffer);

        let transport = Arc::clone(&self.transport);
        let request = FetchRequest::new(self.manifest_url.clone());
        let body = stream::once(async move { transport.fetch(request).await })
            .try_flatten()
            .boxed();
        self.manifest = Some(body);
    }

    fn on_manifest_chunk(&mut self, chunk: Option<Chunk>) -> Result<Flow, StreamError> {
        match chunk {
            Some(Ok(bytes)) => self.parser.feed(&bytes)?,
            Some(Err(e)) => return Err(StreamError::manifest_fetch(self.manifest_url.as_str(), e)),
            None => {
                self.manifest = None;
                self.parser.finish()?;
            }
        }

        let events: Vec<ParserEvent> = self.parser.events().collect();
        for event in events {
            match event {
                ParserEvent::StartTime(start) => {
                    trace!(start, "Manifest timeline anchor");
                    self.timeline.anchor(start);
                }
                ParserEvent::Item(segment) => self.on_item(segment),
                ParserEvent::EndList => self.is_static = true,
                ParserEvent::EndEarly => {
                    // The parser has what it needs; stop downloading the rest.
                    self.manifest = None;
                }
                ParserEvent::End => return Ok(self.end_round()),
            }
        }
        Ok(Flow::Continue)
    }

    fn on_item(&mut self, segment: Segment) {
        let timed = self.timeline.place(segment);
        self.window.record_seen(&timed);
        if self.timeline.reached_begin(&timed) {
            self.accept(timed);
        } else {
            trace!(
                seq = timed.segment.sequence,
                time = timed.time,
                begin = self.timeline.begin(),
                "Segment before begin, tailing"
            );
            self.window.tail.push(timed);
        }
    }

    fn accept(&mut self, timed: TimedSegment) {
        if !self.timeline.admit(&timed) {
            trace!(seq = timed.segment.sequence, "Segment already seen, skipping");
            return;
        }
        debug!(
            seq = timed.segment.sequence,
            init = timed.segment.is_init,
            duration_ms = timed.segment.duration_ms,
            url = %timed.segment.url,
            "Queueing segment"
        );
        self.window.record_accepted(&timed);
        self.fetch_queue.push(timed);
        self.start_fetches();
    }

    fn end_round(&mut self) -> Flow {
        self.manifest = None;

        // Too far ahead of the manifest: fall back to the newest buffered content.
        if self.window.accepted() == 0 && !self.window.tail.is_empty() {
            debug!(
                count = self.window.tail.len(),
                "Nothing reached begin, using tail buffer"
            );
            let tail = self.window.tail.take();
            for timed in tail {
                self.accept(timed);
            }
        }

        self.refresh_threshold = self.window.refresh_threshold();
        self.min_refresh_interval = self
            .window
            .min_refresh_interval(self.config.empty_refresh_interval);
        debug!(
            seen = self.window.seen(),
            accepted = self.window.accepted(),
            is_static = self.is_static,
            refresh_threshold = self.refresh_threshold,
            min_refresh_ms = self.min_refresh_interval.as_millis() as u64,
            "Manifest round complete"
        );

        self.fetching_manifest = false;
        self.on_queued_end()
    }

    /// Decides what follows a finished segment or manifest round: schedule a
    /// refresh when the queue runs low, or end once a static manifest drains.
    fn on_queued_end(&mut self) -> Flow {
        if self.fetching_manifest {
            return Flow::Continue;
        }
        let remaining = self.fetch_queue.pending() + self.fetch_queue.active();

        if !self.is_static && remaining <= self.refresh_threshold {
            let wait = self
                .min_refresh_interval
                .saturating_sub(self.last_refresh.elapsed());
            debug!(remaining, wait_ms = wait.as_millis() as u64, "Scheduling manifest refresh");
            self.fetching_manifest = true;
            self.refresh_timer = Some(Box::pin(tokio::time::sleep(wait)));
            Flow::Continue
        } else if self.is_static && self.fetch_queue.is_idle() {
            Flow::Ended
        } else {
            Flow::Continue
        }
    }

    /// Starts fetches while readahead slots are free. Each started fetch joins
    /// the output queue immediately, so output order is start order.
    fn start_fetches(&mut self) {
        while let Some((fetch_ticket, timed)) = self.fetch_queue.next_ready() {
            let segment = timed.segment;
            let url = match self.manifest_url.join(&segment.url) {
                Ok(url) => url,
                Err(e) => {
                    let err = StreamError::invalid_url(&segment.url, e.to_string());
                    let _ = self.failure_tx.send((segment.url, err));
                    return;
                }
            };

            let request = FetchRequest::new(url.clone()).with_range(segment.byte_range);
            let chunks = spawn_pump(
                Arc::clone(&self.transport),
                request,
                self.failure_tx.clone(),
                self.token.child_token(),
            );
            self.output_queue.push(OutputTask {
                fetch_ticket,
                segment,
                url,
                chunks,
            });
        }
        self.start_output();
    }

    fn start_output(&mut self) {
        if self.current.is_some() {
            return;
        }
        if let Some((ticket, task)) = self.output_queue.next_ready() {
            trace!(url = %task.url, "Forwarding segment");
            self.current = Some(ActiveOutput {
                ticket,
                task,
                size: 0,
            });
        }
    }

    async fn on_segment_chunk(&mut self, chunk: Option<Bytes>) -> Result<Flow, StreamError> {
        let Some(bytes) = chunk else {
            return self.finish_segment().await;
        };
        if let Some(current) = &mut self.current {
            current.size += bytes.len() as u64;
        }
        self.emit(StreamEvent::Data(bytes)).await?;
        Ok(Flow::Continue)
    }

    async fn finish_segment(&mut self) -> Result<Flow, StreamError> {
        let Some(done) = self.current.take() else {
            return Ok(Flow::Continue);
        };
        self.output_queue.complete(done.ticket);

        if self.fetch_queue.complete(done.task.fetch_ticket) {
            self.segment_number += 1;
            self.downloaded += done.size;
            let progress = Progress {
                num: self.segment_number,
                size: done.size,
                duration_ms: done.task.segment.duration_ms,
                url: done.task.url.to_string(),
                total_segments: self.fetch_queue.total(),
                downloaded_bytes: self.downloaded,
            };
            debug!(
                num = progress.num,
                size = progress.size,
                seq = done.task.segment.sequence,
                "Segment forwarded"
            );
            self.emit(StreamEvent::Progress(progress)).await?;
        }

        self.start_fetches();
        Ok(self.on_queued_end())
    }

    /// Sends to the consumer, giving up when it stops or goes away.
    async fn emit(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StreamError::Cancelled),
            sent = self.output.send(Ok(event)) => sent.map_err(|_| StreamError::Cancelled),
        }
    }
}

/// Streams one segment body into a bounded channel until it ends, fails, or
/// `token` is cancelled. A full channel pauses the read.
fn spawn_pump(
    transport: Arc<dyn Transport>,
    request: FetchRequest,
    failures: mpsc::UnboundedSender<FetchFailure>,
    token: CancellationToken,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(SEGMENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = pump(transport, request, tx, failures) => {}
        }
    });
    rx
}

async fn pump(
    transport: Arc<dyn Transport>,
    request: FetchRequest,
    tx: mpsc::Sender<Bytes>,
    failures: mpsc::UnboundedSender<FetchFailure>,
) {
    let url = request.url.to_string();
    let mut body = match transport.fetch(request).await {
        Ok(body) => body,
        Err(e) => {
            let _ = failures.send((url, e));
            return;
        }
    };
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                // Reported before `tx` drops, so the failure wins over the end of body.
                let _ = failures.send((url, e));
                return;
            }
        }
    }
}

async fn next_segment_chunk(current: &mut Option<ActiveOutput>) -> Option<Bytes> {
    match current {
        Some(active) => active.task.chunks.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_manifest_chunk(manifest: &mut Option<ByteStream>) -> Option<Chunk> {
    match manifest {
        Some(body) => body.next().await,
        None => std::future::pending().await,
    }
}

async fn refresh_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
