use std::time::Duration;

use manifest::{ManifestKind, ParseError, parse_human_time};

use crate::error::StreamError;

pub const DEFAULT_LIVE_BUFFER: Duration = Duration::from_secs(20);
pub const DEFAULT_CHUNK_READAHEAD: usize = 3;
pub const DEFAULT_EMPTY_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Where on the manifest timeline output starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Begin {
    /// Start of the first fetched manifest window.
    #[default]
    Start,
    /// Absolute timeline position in milliseconds (epoch based for anchored
    /// manifests). The live buffer is subtracted from it.
    Absolute(u64),
    /// Offset in milliseconds from the manifest's timeline anchor.
    Relative(u64),
    /// The wall-clock live edge minus the live buffer.
    Now,
}

impl Begin {
    /// Parses a human readable offset (`"1:30.123"`, `"2h10s"`) into a
    /// [`Begin::Relative`].
    pub fn relative(input: &str) -> Result<Self, ParseError> {
        parse_human_time(input).map(Begin::Relative)
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub begin: Begin,

    /// How far behind the begin point buffered segments may reach.
    pub live_buffer: Duration,

    /// Segments fetched concurrently ahead of the output.
    pub chunk_readahead: usize,

    pub kind: ManifestKind,

    /// Wait before polling again after a round that saw no segments at all.
    pub empty_refresh_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            begin: Begin::Start,
            live_buffer: DEFAULT_LIVE_BUFFER,
            chunk_readahead: DEFAULT_CHUNK_READAHEAD,
            kind: ManifestKind::Auto,
            empty_refresh_interval: DEFAULT_EMPTY_REFRESH_INTERVAL,
        }
    }
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.chunk_readahead == 0 {
            return Err(StreamError::configuration(
                "chunk_readahead must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(mut self, begin: Begin) -> Self {
        self.config.begin = begin;
        self
    }

    pub fn live_buffer(mut self, live_buffer: Duration) -> Self {
        self.config.live_buffer = live_buffer;
        self
    }

    pub fn chunk_readahead(mut self, readahead: usize) -> Self {
        self.config.chunk_readahead = readahead;
        self
    }

    pub fn kind(mut self, kind: ManifestKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Shorthand for a DASH manifest following `representation`.
    pub fn representation(mut self, representation: impl Into<String>) -> Self {
        self.config.kind = ManifestKind::Dash {
            representation: Some(representation.into()),
        };
        self
    }

    pub fn empty_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.empty_refresh_interval = interval;
        self
    }

    pub fn build(self) -> Result<StreamConfig, StreamError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.begin, Begin::Start);
        assert_eq!(config.live_buffer, Duration::from_secs(20));
        assert_eq!(config.chunk_readahead, 3);
        assert_eq!(config.kind, ManifestKind::Auto);
    }

    #[test]
    fn builder_validates_readahead() {
        assert!(matches!(
            StreamConfig::builder().chunk_readahead(0).build(),
            Err(StreamError::Configuration { .. })
        ));
        let config = StreamConfig::builder()
            .chunk_readahead(1)
            .representation("v1")
            .build()
            .unwrap();
        assert_eq!(config.chunk_readahead, 1);
        assert_eq!(
            config.kind,
            ManifestKind::Dash {
                representation: Some("v1".to_owned())
            }
        );
    }

    #[test]
    fn relative_begin_from_human_time() {
        assert_eq!(Begin::relative("1:30.123").unwrap(), Begin::Relative(90_123));
        assert!(Begin::relative("later").is_err());
    }
}
