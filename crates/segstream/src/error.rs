use manifest::ParseError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    Http { status: StatusCode, url: String },

    #[error("failed to fetch manifest {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: Box<StreamError>,
    },

    #[error("failed to parse manifest: {source}")]
    ManifestParse {
        #[from]
        source: ParseError,
    },

    #[error("failed to fetch segment {url}: {source}")]
    SegmentFetch {
        url: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Http {
            status,
            url: url.into(),
        }
    }

    pub fn manifest_fetch(url: impl Into<String>, source: StreamError) -> Self {
        Self::ManifestFetch {
            url: url.into(),
            source: Box::new(source),
        }
    }

    pub fn segment_fetch(url: impl Into<String>, source: StreamError) -> Self {
        Self::SegmentFetch {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Whether a transport may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::Configuration { .. }
            | Self::ProxyConfiguration { .. }
            | Self::ManifestParse { .. } => false,
            Self::Http { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => crate::retry::is_retryable_reqwest_error(source),
            Self::ManifestFetch { source, .. } | Self::SegmentFetch { source, .. } => {
                source.is_retryable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status() {
        assert!(StreamError::http(StatusCode::BAD_GATEWAY, "u").is_retryable());
        assert!(StreamError::http(StatusCode::TOO_MANY_REQUESTS, "u").is_retryable());
        assert!(!StreamError::http(StatusCode::NOT_FOUND, "u").is_retryable());
    }

    #[test]
    fn wrapped_errors_keep_classification_and_message() {
        let err = StreamError::segment_fetch(
            "http://a.b/1.ts",
            StreamError::http(StatusCode::SERVICE_UNAVAILABLE, "http://a.b/1.ts"),
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "failed to fetch segment http://a.b/1.ts: request failed with HTTP 503 Service Unavailable for http://a.b/1.ts"
        );

        let err = StreamError::from(ParseError::RepresentationNotFound("v1".to_owned()));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "failed to parse manifest: Representation 'v1' not found"
        );
    }
}
