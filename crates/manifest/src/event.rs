use crate::segment::Segment;

/// Normalized output of both manifest parsers.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// Timeline anchor in milliseconds (epoch based when the manifest carries a
    /// wall-clock reference).
    StartTime(f64),
    /// A fetchable segment, in manifest order.
    Item(Segment),
    /// The manifest is complete and will not grow (HLS `#EXT-X-ENDLIST`, DASH
    /// `type="static"`).
    EndList,
    /// The parser has everything it needs; remaining input may be dropped.
    EndEarly,
    /// The parser is done for this manifest fetch.
    End,
}
