use std::fmt;

/// Inclusive byte range of a resource, as sent in a `Range` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One fetchable unit referenced by a manifest.
///
/// `url` is kept as written in the manifest (possibly relative); resolving it
/// against the manifest URL is the consumer's job.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub url: String,
    pub sequence: u64,
    /// Duration in milliseconds. Always `0.0` for init segments.
    pub duration_ms: f64,
    pub is_init: bool,
    pub byte_range: Option<ByteRange>,
}

impl Segment {
    pub fn media(url: impl Into<String>, sequence: u64, duration_ms: f64) -> Self {
        Self {
            url: url.into(),
            sequence,
            duration_ms,
            is_init: false,
            byte_range: None,
        }
    }

    pub fn init(url: impl Into<String>, sequence: u64) -> Self {
        Self {
            url: url.into(),
            sequence,
            duration_ms: 0.0,
            is_init: true,
            byte_range: None,
        }
    }

    pub fn with_byte_range(mut self, range: Option<ByteRange>) -> Self {
        self.byte_range = range;
        self
    }
}
