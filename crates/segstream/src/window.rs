// Timeline bookkeeping for manifest refresh rounds.

use std::collections::VecDeque;
use std::time::Duration;

use manifest::Segment;

/// A segment placed on the stream timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSegment {
    pub segment: Segment,
    /// Position on the timeline in milliseconds.
    pub time: f64,
}

/// Running timeline shared by every refresh round of one stream.
#[derive(Debug)]
pub(crate) struct Timeline {
    /// Timeline position of the next segment.
    position: f64,
    anchored: bool,
    begin: f64,
    relative_begin: bool,
    last_sequence: Option<u64>,
}

impl Timeline {
    pub fn new(begin: f64, relative_begin: bool) -> Self {
        Self {
            position: 0.0,
            anchored: false,
            begin,
            relative_begin,
            last_sequence: None,
        }
    }

    /// Fixes the timeline anchor. Only the first anchor of a stream counts, and
    /// only before any duration has been accumulated.
    pub fn anchor(&mut self, start_ms: f64) {
        if self.anchored || self.position != 0.0 {
            return;
        }
        self.anchored = true;
        self.position = start_ms;
        if self.relative_begin {
            self.begin += start_ms;
        }
    }

    /// Places `segment` at the current position and advances past it.
    pub fn place(&mut self, segment: Segment) -> TimedSegment {
        let time = self.position;
        self.position += segment.duration_ms;
        TimedSegment { segment, time }
    }

    pub fn reached_begin(&self, timed: &TimedSegment) -> bool {
        self.begin <= timed.time
    }

    /// Sequence dedup. Admitted segments move the begin point to their time.
    pub fn admit(&mut self, timed: &TimedSegment) -> bool {
        if !timed.segment.is_init {
            let sequence = timed.segment.sequence;
            if self.last_sequence.is_some_and(|last| sequence <= last) {
                return false;
            }
            self.last_sequence = Some(sequence);
        }
        self.begin = timed.time;
        true
    }

    pub fn begin(&self) -> f64 {
        self.begin
    }
}

/// Segments that arrived before the begin point, capped by cumulative duration.
#[derive(Debug)]
pub(crate) struct TailBuffer {
    items: VecDeque<TimedSegment>,
    duration: f64,
    limit: f64,
}

impl TailBuffer {
    pub fn new(limit: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            duration: 0.0,
            limit: limit.as_secs_f64() * 1000.0,
        }
    }

    pub fn push(&mut self, timed: TimedSegment) {
        self.duration += timed.segment.duration_ms;
        self.items.push_back(timed);
        // Keep the newest `limit` worth of items, and always at least one.
        while self.items.len() > 1 {
            let Some(first) = self.items.front() else {
                break;
            };
            if self.duration - first.segment.duration_ms <= self.limit {
                break;
            }
            self.duration -= first.segment.duration_ms;
            self.items.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn take(&mut self) -> Vec<TimedSegment> {
        self.duration = 0.0;
        self.items.drain(..).collect()
    }
}

/// What one manifest fetch contributed.
#[derive(Debug)]
pub(crate) struct ManifestWindow {
    accepted: usize,
    accepted_duration: f64,
    seen: usize,
    seen_duration: f64,
    pub tail: TailBuffer,
}

impl ManifestWindow {
    pub fn new(live_buffer: Duration) -> Self {
        Self {
            accepted: 0,
            accepted_duration: 0.0,
            seen: 0,
            seen_duration: 0.0,
            tail: TailBuffer::new(live_buffer),
        }
    }

    pub fn record_seen(&mut self, timed: &TimedSegment) {
        self.seen += 1;
        self.seen_duration += timed.segment.duration_ms;
    }

    pub fn record_accepted(&mut self, timed: &TimedSegment) {
        self.accepted += 1;
        self.accepted_duration += timed.segment.duration_ms;
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Queued plus in-flight segments at or below which the next refresh is due.
    pub fn refresh_threshold(&self) -> usize {
        ((self.accepted as f64 * 0.01).ceil() as usize).max(1)
    }

    /// Minimum spacing between this fetch and the next one.
    ///
    /// This is the duration of the newly accepted content. A round that
    /// accepted nothing waits for the mean duration of what it saw, or
    /// `fallback` when it saw nothing.
    pub fn min_refresh_interval(&self, fallback: Duration) -> Duration {
        let ms = if self.accepted > 0 {
            self.accepted_duration
        } else if self.seen > 0 {
            self.seen_duration / self.seen as f64
        } else {
            return fallback;
        };
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(sequence: u64, duration_ms: f64, time: f64) -> TimedSegment {
        TimedSegment {
            segment: Segment::media(format!("{sequence}.ts"), sequence, duration_ms),
            time,
        }
    }

    #[test]
    fn tail_keeps_last_live_buffer_of_items() {
        let mut tail = TailBuffer::new(Duration::from_secs(20));
        for seq in 0..5 {
            tail.push(timed(seq, 10_000.0, seq as f64 * 10_000.0));
        }
        let kept: Vec<u64> = tail.take().iter().map(|t| t.segment.sequence).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert!(tail.is_empty());
    }

    #[test]
    fn tail_always_keeps_newest_item() {
        let mut tail = TailBuffer::new(Duration::from_secs(1));
        tail.push(timed(0, 5_000.0, 0.0));
        tail.push(timed(1, 5_000.0, 5_000.0));
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.take()[0].segment.sequence, 1);
    }

    #[test]
    fn timeline_anchors_once_and_shifts_relative_begin() {
        let mut timeline = Timeline::new(30_000.0, true);
        timeline.anchor(1_000_000.0);
        timeline.anchor(5.0);
        assert_eq!(timeline.begin(), 1_030_000.0);
        let placed = timeline.place(Segment::media("a.ts", 0, 2_000.0));
        assert_eq!(placed.time, 1_000_000.0);
        assert_eq!(timeline.place(Segment::media("b.ts", 1, 2_000.0)).time, 1_002_000.0);
    }

    #[test]
    fn anchor_ignored_after_content() {
        let mut timeline = Timeline::new(0.0, false);
        timeline.place(Segment::media("a.ts", 0, 2_000.0));
        timeline.anchor(1_000_000.0);
        assert_eq!(timeline.place(Segment::media("b.ts", 1, 2_000.0)).time, 2_000.0);
    }

    #[test]
    fn admit_rejects_seen_sequences_but_not_init() {
        let mut timeline = Timeline::new(0.0, false);
        assert!(timeline.admit(&timed(5, 1.0, 0.0)));
        assert!(!timeline.admit(&timed(5, 1.0, 1.0)));
        assert!(!timeline.admit(&timed(4, 1.0, 2.0)));
        let init = TimedSegment {
            segment: Segment::init("init.mp4", 5),
            time: 3.0,
        };
        assert!(timeline.admit(&init));
        assert!(timeline.admit(&timed(6, 1.0, 4.0)));
        assert_eq!(timeline.begin(), 4.0);
    }

    #[test]
    fn refresh_scheduling_values() {
        let mut window = ManifestWindow::new(Duration::from_secs(20));
        assert_eq!(window.refresh_threshold(), 1);
        assert_eq!(
            window.min_refresh_interval(Duration::from_secs(1)),
            Duration::from_secs(1)
        );

        for seq in 0..150 {
            let t = timed(seq, 2_000.0, 0.0);
            window.record_seen(&t);
            if seq < 3 {
                window.record_accepted(&t);
            }
        }
        assert_eq!(window.refresh_threshold(), 1);
        assert_eq!(
            window.min_refresh_interval(Duration::ZERO),
            Duration::from_secs(6)
        );

        let mut big = ManifestWindow::new(Duration::from_secs(20));
        for seq in 0..150 {
            big.record_accepted(&timed(seq, 1.0, 0.0));
        }
        assert_eq!(big.refresh_threshold(), 2);
    }

    #[test]
    fn empty_round_waits_mean_seen_duration() {
        let mut window = ManifestWindow::new(Duration::from_secs(20));
        window.record_seen(&timed(0, 2_000.0, 0.0));
        window.record_seen(&timed(1, 4_000.0, 0.0));
        assert_eq!(window.accepted(), 0);
        assert_eq!(
            window.min_refresh_interval(Duration::from_secs(1)),
            Duration::from_secs(3)
        );
    }
}
