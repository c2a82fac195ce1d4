// Manifest parsing: HLS playlists and DASH MPDs normalized into one event contract.
pub mod dash;
pub mod error;
pub mod event;
pub mod hls;
pub mod parser;
pub mod segment;
mod template;
pub mod time;

// Export common types for ease of use
pub use dash::TreeParser;
pub use error::ParseError;
pub use event::ParserEvent;
pub use hls::LineParser;
pub use parser::{ManifestKind, ManifestParser};
pub use segment::{ByteRange, Segment};
pub use time::{parse_datetime, parse_human_time, parse_iso_duration};
