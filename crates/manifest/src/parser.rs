use crate::dash::TreeParser;
use crate::error::ParseError;
use crate::event::ParserEvent;
use crate::hls::LineParser;

/// Which manifest format a URL carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ManifestKind {
    /// Pick by URL: paths ending in `.mpd` are DASH, everything else HLS.
    #[default]
    Auto,
    Hls,
    Dash {
        /// Representation id to follow; the first one found when `None`.
        representation: Option<String>,
    },
}

impl ManifestKind {
    /// Resolves [`ManifestKind::Auto`] against a manifest URL.
    pub fn resolve(&self, url: &str) -> ManifestKind {
        match self {
            ManifestKind::Auto if is_dash_url(url) => ManifestKind::Dash {
                representation: None,
            },
            ManifestKind::Auto => ManifestKind::Hls,
            other => other.clone(),
        }
    }
}

fn is_dash_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".mpd")
}

/// Either manifest parser behind one push interface.
///
/// A fresh parser is built for every manifest fetch.
#[derive(Debug)]
pub enum ManifestParser {
    Line(LineParser),
    Tree(TreeParser),
}

impl ManifestParser {
    pub fn for_kind(kind: &ManifestKind, url: &str) -> Self {
        match kind.resolve(url) {
            ManifestKind::Dash { representation } => Self::Tree(TreeParser::new(representation)),
            _ => Self::Line(LineParser::new()),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        match self {
            Self::Line(p) => p.feed(chunk),
            Self::Tree(p) => p.feed(chunk),
        }
    }

    pub fn finish(&mut self) -> Result<(), ParseError> {
        match self {
            Self::Line(p) => p.finish(),
            Self::Tree(p) => p.finish(),
        }
    }

    pub fn next_event(&mut self) -> Option<ParserEvent> {
        match self {
            Self::Line(p) => p.next_event(),
            Self::Tree(p) => p.next_event(),
        }
    }

    /// Drains every queued event.
    pub fn events(&mut self) -> impl Iterator<Item = ParserEvent> + '_ {
        std::iter::from_fn(move || self.next_event())
    }

    pub fn is_dash(&self) -> bool {
        matches!(self, Self::Tree(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detects_dash_by_extension() {
        assert_eq!(
            ManifestKind::Auto.resolve("https://a.b/live/Manifest.MPD?token=1"),
            ManifestKind::Dash {
                representation: None
            }
        );
        assert_eq!(
            ManifestKind::Auto.resolve("https://a.b/live/index.m3u8"),
            ManifestKind::Hls
        );
        assert_eq!(
            ManifestKind::Auto.resolve("https://a.b/x.m3u8?next=y.mpd"),
            ManifestKind::Hls
        );
    }

    #[test]
    fn explicit_kind_wins() {
        let kind = ManifestKind::Dash {
            representation: Some("v1".to_owned()),
        };
        assert!(ManifestParser::for_kind(&kind, "https://a.b/index.m3u8").is_dash());
        assert!(!ManifestParser::for_kind(&ManifestKind::Hls, "https://a.b/x.mpd").is_dash());
    }

    #[test]
    fn dispatches_to_line_parser() {
        let mut parser = ManifestParser::for_kind(&ManifestKind::Auto, "https://a.b/index.m3u8");
        parser
            .feed(b"#EXTM3U\n#EXTINF:2.000,\none.ts\n#EXT-X-ENDLIST\n")
            .unwrap();
        parser.finish().unwrap();
        let events: Vec<ParserEvent> = parser.events().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ParserEvent::Item(s) if s.url == "one.ts"));
        assert_eq!(events[1], ParserEvent::EndList);
        assert_eq!(events[2], ParserEvent::End);
    }
}
