// HLS media playlist parser: line oriented, fed with arbitrarily chunked bytes.

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::error::ParseError;
use crate::event::ParserEvent;
use crate::segment::{ByteRange, Segment};
use crate::time::parse_datetime;

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Z0-9-]+)=("[^"]*"|[^,]*)"#).expect("valid attribute regex")
});

/// Parses an HLS attribute list (`KEY=VALUE,KEY="quoted, value"`).
fn parse_attributes(value: &str) -> HashMap<&str, &str> {
    ATTRIBUTE
        .captures_iter(value)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str();
            let raw = caps.get(2)?.as_str();
            let unquoted = raw
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(raw);
            Some((key, unquoted))
        })
        .collect()
}

/// Stateful line parser for HLS media playlists.
///
/// Bytes are pushed with [`LineParser::feed`]; recognized items are queued and
/// pulled with [`LineParser::next_event`]. The last, possibly incomplete line
/// of every chunk is carried over until the next chunk or [`LineParser::finish`].
#[derive(Debug, Default)]
pub struct LineParser {
    partial: Vec<u8>,
    sequence: u64,
    next_duration: Option<f64>,
    next_range: Option<ByteRange>,
    last_range_end: Option<u64>,
    start_time_sent: bool,
    events: VecDeque<ParserEvent>,
    failed: bool,
    finished: bool,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        if self.failed || self.finished {
            return Ok(());
        }
        self.partial.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = memchr::memchr(b'\n', &self.partial[start..]) {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.partial[start..end]).into_owned();
            start = end + 1;
            if let Err(e) = self.parse_line(&line) {
                self.fail();
                return Err(e);
            }
        }
        self.partial.drain(..start);
        Ok(())
    }

    /// Flushes the carried-over line and emits [`ParserEvent::End`].
    pub fn finish(&mut self) -> Result<(), ParseError> {
        if self.failed || self.finished {
            return Ok(());
        }
        self.finished = true;

        let last = std::mem::take(&mut self.partial);
        if !last.is_empty() {
            let line = String::from_utf8_lossy(&last).into_owned();
            if let Err(e) = self.parse_line(&line) {
                self.fail();
                return Err(e);
            }
        }
        self.events.push_back(ParserEvent::End);
        Ok(())
    }

    pub fn next_event(&mut self) -> Option<ParserEvent> {
        self.events.pop_front()
    }

    fn fail(&mut self) {
        self.failed = true;
        self.partial.clear();
        self.events.clear();
    }

    fn parse_line(&mut self, raw: &str) -> Result<(), ParseError> {
        let line = raw.trim_end_matches('\r');

        let Some(directive) = line.strip_prefix('#') else {
            let url = line.trim();
            if !url.is_empty() {
                let segment = Segment::media(url, self.sequence, self.next_duration.take().unwrap_or(0.0))
                    .with_byte_range(self.next_range.take());
                trace!(url = %segment.url, seq = segment.sequence, "Playlist segment");
                self.sequence += 1;
                self.events.push_back(ParserEvent::Item(segment));
            }
            return Ok(());
        };

        if !directive.starts_with("EXT") {
            // Plain comment.
            return Ok(());
        }
        let (tag, value) = directive.split_once(':').unwrap_or((directive, ""));
        let value = value.trim();

        match tag {
            "EXT-X-PROGRAM-DATE-TIME" => {
                if !self.start_time_sent {
                    let start = parse_datetime(value)?;
                    self.start_time_sent = true;
                    self.events.push_back(ParserEvent::StartTime(start as f64));
                }
            }
            "EXT-X-MEDIA-SEQUENCE" => {
                self.sequence = value
                    .parse()
                    .map_err(|_| ParseError::invalid_tag(tag, value))?;
            }
            "EXTINF" => {
                let seconds: f64 = value
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::invalid_tag(tag, value))?;
                self.next_duration = Some((seconds * 1000.0).round());
            }
            "EXT-X-BYTERANGE" => {
                self.next_range = Some(self.parse_range(value)?);
            }
            "EXT-X-MAP" => {
                let attributes = parse_attributes(value);
                let uri = attributes
                    .get("URI")
                    .copied()
                    .filter(|uri| !uri.is_empty())
                    .ok_or(ParseError::MissingMapUri)?
                    .to_owned();
                let range = match attributes.get("BYTERANGE") {
                    Some(range) => Some(self.parse_range(range)?),
                    None => None,
                };
                self.events.push_back(ParserEvent::Item(
                    Segment::init(uri, self.sequence).with_byte_range(range),
                ));
            }
            "EXT-X-ENDLIST" => self.events.push_back(ParserEvent::EndList),
            _ => {}
        }
        Ok(())
    }

    /// Parses `<length>[@<offset>]`. Without an offset the range continues
    /// right after the previous one.
    fn parse_range(&mut self, value: &str) -> Result<ByteRange, ParseError> {
        let invalid = || ParseError::InvalidByteRange(value.to_owned());
        let (length, offset) = match value.split_once('@') {
            Some((length, offset)) => (length, Some(offset)),
            None => (value, None),
        };
        let length: u64 = length.trim().parse().map_err(|_| invalid())?;
        if length == 0 {
            return Err(invalid());
        }
        let start = match offset {
            Some(offset) => offset.trim().parse().map_err(|_| invalid())?,
            None => self.last_range_end.map_or(0, |end| end + 1),
        };
        let range = ByteRange::new(start, start + length - 1);
        self.last_range_end = Some(range.end);
        Ok(range)
    }
}
