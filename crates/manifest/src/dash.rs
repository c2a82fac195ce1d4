// DASH MPD parser: streaming XML driven, resolves one representation's segments.

use std::collections::{HashMap, VecDeque};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::event::ParserEvent;
use crate::segment::{ByteRange, Segment};
use crate::template::{TemplateContext, expand};
use crate::time::{parse_datetime, parse_iso_duration};

const DEFAULT_TIMESCALE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Mpd,
    Period,
    AdaptationSet,
    Representation,
    SegmentList,
    SegmentTemplate,
    SegmentTimeline,
    TimelineEntry,
    Initialization,
    SegmentUrl,
    BaseUrl,
    Other,
}

impl ElementKind {
    fn from_name(name: &str) -> Self {
        match name {
            "mpd" => Self::Mpd,
            "period" => Self::Period,
            "adaptationset" => Self::AdaptationSet,
            "representation" => Self::Representation,
            "segmentlist" => Self::SegmentList,
            "segmenttemplate" => Self::SegmentTemplate,
            "segmenttimeline" => Self::SegmentTimeline,
            "s" => Self::TimelineEntry,
            "initialization" => Self::Initialization,
            "segmenturl" => Self::SegmentUrl,
            "baseurl" => Self::BaseUrl,
            _ => Self::Other,
        }
    }
}

/// One open element of the document.
#[derive(Debug)]
struct Scope {
    kind: ElementKind,
    id: Option<String>,
    bandwidth: Option<u64>,
    base_url: Option<String>,
    selected: bool,
}

/// Index of the `Period`, `AdaptationSet` or `Representation` a template or
/// timeline belongs to. It stays in effect until that element closes.
type Owner = usize;

#[derive(Debug, Clone)]
struct Template {
    initialization: Option<String>,
    media: Option<String>,
    owner: Owner,
}

#[derive(Debug, Clone, Copy)]
struct TimelineEntry {
    time: Option<u64>,
    duration: u64,
    repeat: u64,
}

#[derive(Debug)]
struct Timeline {
    entries: VecDeque<TimelineEntry>,
    owner: Owner,
}

type Attributes = HashMap<String, String>;

fn attributes(element: &BytesStart<'_>) -> Result<Attributes, ParseError> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_ascii_lowercase();
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn number_attr(attrs: &Attributes, name: &str) -> Option<u64> {
    attrs.get(name).and_then(|v| v.trim().parse().ok())
}

fn range_attr(attrs: &Attributes, name: &str) -> Result<Option<ByteRange>, ParseError> {
    let Some(value) = attrs.get(name) else {
        return Ok(None);
    };
    let invalid = || ParseError::InvalidByteRange(value.clone());
    let (start, end) = value.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end: u64 = end.trim().parse().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    Ok(Some(ByteRange::new(start, end)))
}

/// Streaming parser for DASH MPDs.
///
/// Only the target representation's segments are emitted. When no target id
/// is given, the first `AdaptationSet`/`Representation` carrying an `id`
/// becomes the target (representations inside a targeted adaptation set are
/// targeted with it). Segments are either listed explicitly (`SegmentList`)
/// and emitted as they are read, or generated from a `SegmentTemplate` and its
/// `SegmentTimeline` when the target element closes. Once the target element
/// closes with at least one segment, the parser stops reading.
#[derive(Debug)]
pub struct TreeParser {
    target: Option<String>,
    buffer: Vec<u8>,
    events: VecDeque<ParserEvent>,
    scopes: Vec<Scope>,

    is_static: bool,
    availability_start_ms: f64,
    period_start_ms: f64,

    sequence: u64,
    timescale: u64,
    default_duration: u64,
    presentation_time_offset: u64,
    // Innermost last. A representation's own template or timeline shadows the
    // adaptation set's one without discarding it for its siblings.
    templates: Vec<Template>,
    timelines: Vec<Timeline>,

    start_time_sent: bool,
    listed: bool,
    got_segments: bool,
    done: bool,
    failed: bool,
}

impl TreeParser {
    pub fn new(target: Option<String>) -> Self {
        Self {
            target,
            buffer: Vec::new(),
            events: VecDeque::new(),
            scopes: Vec::new(),
            is_static: true,
            availability_start_ms: 0.0,
            period_start_ms: 0.0,
            sequence: 0,
            timescale: DEFAULT_TIMESCALE,
            default_duration: 0,
            presentation_time_offset: 0,
            templates: Vec::new(),
            timelines: Vec::new(),
            start_time_sent: false,
            listed: false,
            got_segments: false,
            done: false,
            failed: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        if self.done || self.failed {
            return Ok(());
        }
        self.buffer.extend_from_slice(chunk);

        // Only hand complete markup to the XML reader; a trailing partial tag
        // waits for the next chunk.
        let Some(last) = memchr::memrchr(b'>', &self.buffer) else {
            return Ok(());
        };
        self.parse_buffered(last + 1, false)
    }

    pub fn finish(&mut self) -> Result<(), ParseError> {
        if self.done || self.failed {
            return Ok(());
        }
        let end = self.buffer.len();
        self.parse_buffered(end, true)?;
        if self.done {
            return Ok(());
        }

        if !self.got_segments {
            self.failed = true;
            self.events.clear();
            return Err(ParseError::RepresentationNotFound(
                self.target.clone().unwrap_or_default(),
            ));
        }
        self.done = true;
        self.finalize();
        Ok(())
    }

    pub fn next_event(&mut self) -> Option<ParserEvent> {
        self.events.pop_front()
    }

    fn parse_buffered(&mut self, end: usize, eof: bool) -> Result<(), ParseError> {
        let input = std::mem::take(&mut self.buffer);
        match self.parse_markup(&input[..end], eof) {
            Ok(consumed) => {
                if !self.done {
                    self.buffer = input;
                    self.buffer.drain(..consumed);
                }
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                self.events.clear();
                Err(e)
            }
        }
    }

    /// Runs the XML reader over `input`, returning how many bytes were consumed.
    fn parse_markup(&mut self, input: &[u8], eof: bool) -> Result<usize, ParseError> {
        let mut reader = Reader::from_reader(input);
        let config = reader.config_mut();
        config.trim_text(true);
        config.expand_empty_elements = true;
        // Elements stay open across chunks, so the reader cannot match names itself.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut consumed = 0;
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => return Ok(input.len()),
                Ok(event) => {
                    self.handle_event(event)?;
                    consumed = reader.buffer_position() as usize;
                    if self.done {
                        return Ok(consumed);
                    }
                }
                Err(e) if !eof => {
                    trace!(error = %e, consumed, "Incomplete markup, waiting for more input");
                    return Ok(consumed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn handle_event(&mut self, event: Event<'_>) -> Result<(), ParseError> {
        match event {
            Event::Start(element) => self.open(&element),
            Event::End(_) => {
                self.close();
                Ok(())
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                self.capture_text(&text);
                Ok(())
            }
            Event::CData(data) => {
                let data = data.into_inner();
                self.capture_text(&String::from_utf8_lossy(&data));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn capture_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let len = self.scopes.len();
        if len < 2 || self.scopes[len - 1].kind != ElementKind::BaseUrl {
            return;
        }
        let owner = &mut self.scopes[len - 2];
        if owner.base_url.is_none() {
            owner.base_url = Some(text.to_owned());
        }
    }

    fn open(&mut self, element: &BytesStart<'_>) -> Result<(), ParseError> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).to_ascii_lowercase();
        let kind = ElementKind::from_name(&name);
        let attrs = attributes(element)?;
        let parent_selected = self.scopes.last().is_some_and(|s| s.selected);

        let mut scope = Scope {
            kind,
            id: attrs.get("id").cloned(),
            bandwidth: number_attr(&attrs, "bandwidth"),
            base_url: None,
            selected: parent_selected,
        };

        match kind {
            ElementKind::Mpd => {
                self.is_static = attrs.get("type").is_none_or(|t| t != "dynamic");
                self.availability_start_ms = match attrs.get("availabilitystarttime") {
                    Some(value) => parse_datetime(value)? as f64,
                    None => 0.0,
                };
            }
            ElementKind::Period => {
                self.sequence = 0;
                self.timescale = DEFAULT_TIMESCALE;
                self.default_duration = 0;
                self.presentation_time_offset = 0;
                self.templates.clear();
                self.timelines.clear();
                self.period_start_ms = match attrs.get("start") {
                    Some(value) => parse_iso_duration(value)?,
                    None => 0.0,
                };
            }
            ElementKind::AdaptationSet | ElementKind::Representation => {
                if self.target.is_none()
                    && let Some(id) = &scope.id
                {
                    debug!(id = %id, "Selected first representation as target");
                    self.target = Some(id.clone());
                }
                let matches = scope.id.is_some() && scope.id == self.target;
                scope.selected = matches || (kind == ElementKind::Representation && parent_selected);

                if scope.selected && !self.start_time_sent {
                    self.start_time_sent = true;
                    self.events
                        .push_back(ParserEvent::StartTime(self.anchor_ms()));
                }
            }
            ElementKind::SegmentList => self.apply_segment_attributes(&attrs),
            ElementKind::SegmentTemplate => {
                self.apply_segment_attributes(&attrs);
                self.templates.push(Template {
                    initialization: attrs.get("initialization").cloned(),
                    media: attrs.get("media").cloned(),
                    owner: self.owner(),
                });
            }
            ElementKind::SegmentTimeline => {
                let owner = self.owner();
                self.timelines.retain(|t| t.owner != owner);
                self.timelines.push(Timeline {
                    entries: VecDeque::new(),
                    owner,
                });
            }
            ElementKind::TimelineEntry => {
                let duration = number_attr(&attrs, "d").ok_or_else(|| {
                    ParseError::invalid_tag("S@d", attrs.get("d").cloned().unwrap_or_default())
                })?;
                let repeat = attrs
                    .get("r")
                    .and_then(|r| r.trim().parse::<i64>().ok())
                    .unwrap_or(0)
                    .max(1) as u64;
                if let Some(timeline) = self.timelines.last_mut() {
                    timeline.entries.push_back(TimelineEntry {
                        time: number_attr(&attrs, "t"),
                        duration,
                        repeat,
                    });
                }
            }
            ElementKind::Initialization if scope.selected => {
                let url = self.resolve(attrs.get("sourceurl").map_or("", String::as_str));
                let segment = Segment::init(url, self.sequence)
                    .with_byte_range(range_attr(&attrs, "range")?);
                self.emit_listed(segment);
            }
            ElementKind::SegmentUrl if scope.selected => {
                let entry = self
                    .timelines
                    .last_mut()
                    .and_then(|t| t.entries.pop_front());
                let duration = entry
                    .map(|e| e.duration)
                    .filter(|d| *d > 0)
                    .unwrap_or(self.default_duration);
                let url = self.resolve(attrs.get("media").map_or("", String::as_str));
                let segment = Segment::media(url, self.sequence, self.to_ms(duration))
                    .with_byte_range(range_attr(&attrs, "mediarange")?);
                self.sequence += 1;
                self.emit_listed(segment);
            }
            _ => {}
        }

        self.scopes.push(scope);
        Ok(())
    }

    fn close(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        if !matches!(
            scope.kind,
            ElementKind::AdaptationSet | ElementKind::Representation
        ) {
            return;
        }

        if scope.selected {
            if !self.listed
                && self.timelines.last().is_some_and(|t| !t.entries.is_empty())
                && let Some(template) = self.templates.last().cloned()
            {
                self.expand_template(&template, &scope);
            }
            if self.got_segments {
                debug!(
                    target = ?self.target,
                    "Target representation resolved, ending early"
                );
                self.done = true;
                self.events.push_back(ParserEvent::EndEarly);
                self.finalize();
                return;
            }
        }

        // Templates and timelines owned by the closed element go with it.
        let closed = self.scopes.len();
        self.templates.retain(|t| t.owner < closed);
        self.timelines.retain(|t| t.owner < closed);
    }

    fn expand_template(&mut self, template: &Template, scope: &Scope) {
        let base = self.base_url_with(scope);
        let representation_id = scope
            .id
            .clone()
            .or_else(|| self.target.clone())
            .unwrap_or_default();
        let entries = self
            .timelines
            .last_mut()
            .map(|t| std::mem::take(&mut t.entries))
            .unwrap_or_default();
        let mut time = entries.front().and_then(|e| e.time).unwrap_or(0);

        if let Some(initialization) = &template.initialization {
            let ctx = TemplateContext {
                representation_id: &representation_id,
                number: self.sequence,
                time,
                bandwidth: scope.bandwidth,
            };
            let url = format!("{base}{}", expand(initialization, &ctx));
            self.events
                .push_back(ParserEvent::Item(Segment::init(url, self.sequence)));
        }

        let Some(media) = &template.media else {
            return;
        };
        for entry in &entries {
            if let Some(t) = entry.time {
                time = t;
            }
            let duration_ms = self.to_ms(entry.duration);
            for _ in 0..entry.repeat {
                let ctx = TemplateContext {
                    representation_id: &representation_id,
                    number: self.sequence,
                    time,
                    bandwidth: scope.bandwidth,
                };
                let url = format!("{base}{}", expand(media, &ctx));
                self.events.push_back(ParserEvent::Item(Segment::media(
                    url,
                    self.sequence,
                    duration_ms,
                )));
                self.got_segments = true;
                self.sequence += 1;
                time += entry.duration;
            }
        }
    }

    fn emit_listed(&mut self, segment: Segment) {
        trace!(url = %segment.url, seq = segment.sequence, "Listed segment");
        self.listed = true;
        self.got_segments = true;
        self.events.push_back(ParserEvent::Item(segment));
    }

    fn finalize(&mut self) {
        if self.is_static {
            self.events.push_back(ParserEvent::EndList);
        }
        self.events.push_back(ParserEvent::End);
    }

    fn apply_segment_attributes(&mut self, attrs: &Attributes) {
        if let Some(start) = number_attr(attrs, "startnumber") {
            self.sequence = start;
        }
        if let Some(timescale) = number_attr(attrs, "timescale").filter(|t| *t > 0) {
            self.timescale = timescale;
        }
        if let Some(duration) = number_attr(attrs, "duration").filter(|d| *d > 0) {
            self.default_duration = duration;
        }
        if let Some(offset) = number_attr(attrs, "presentationtimeoffset") {
            self.presentation_time_offset = offset;
        }
    }

    /// Index of the innermost open `Period`, `AdaptationSet` or `Representation`.
    fn owner(&self) -> Owner {
        self.scopes
            .iter()
            .rposition(|s| {
                matches!(
                    s.kind,
                    ElementKind::Period | ElementKind::AdaptationSet | ElementKind::Representation
                )
            })
            .unwrap_or(0)
    }

    fn anchor_ms(&self) -> f64 {
        self.availability_start_ms + self.period_start_ms
            - self.to_ms(self.presentation_time_offset)
    }

    fn to_ms(&self, units: u64) -> f64 {
        units as f64 / self.timescale as f64 * 1000.0
    }

    /// Base URL made of every open scope's `BaseURL`, outermost first.
    fn base_url(&self) -> String {
        self.scopes
            .iter()
            .filter_map(|s| s.base_url.as_deref())
            .collect()
    }

    fn base_url_with(&self, closed: &Scope) -> String {
        let mut base = self.base_url();
        if let Some(own) = &closed.base_url {
            base.push_str(own);
        }
        base
    }

    fn resolve(&self, url: &str) -> String {
        format!("{}{url}", self.base_url())
    }
}
