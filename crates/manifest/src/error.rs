use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("`EXT-X-MAP` found without required attribute `URI`")]
    MissingMapUri,

    #[error("invalid value for `{tag}`: `{value}`")]
    InvalidTag { tag: String, value: String },

    #[error("invalid byte range `{0}`")]
    InvalidByteRange(String),

    #[error("invalid time `{0}`")]
    InvalidTime(String),

    #[error("invalid ISO-8601 duration `{0}`")]
    InvalidDuration(String),

    #[error("invalid datetime `{input}`: {reason}")]
    InvalidDateTime { input: String, reason: String },

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Representation '{0}' not found")]
    RepresentationNotFound(String),
}

impl ParseError {
    pub fn invalid_tag(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidTag {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ParseError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}
