// Explicit proxy shared by the manifest and segment requests of a stream.

use reqwest::Proxy;
use url::Url;

use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
    /// SOCKS5 with hostname resolution on the proxy side.
    Socks5h,
}

impl ProxyScheme {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" => Some(Self::Socks5),
            "socks5h" => Some(Self::Socks5h),
            _ => None,
        }
    }

    fn is_socks(self) -> bool {
        matches!(self, Self::Socks5 | Self::Socks5h)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy for every request of a stream, HTTP and HTTPS targets alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy endpoint, never carrying credentials.
    pub url: Url,
    pub scheme: ProxyScheme,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Parses `scheme://[user:pass@]host:port`. A bare `host:port` is an HTTP
    /// proxy. Credentials in the URL are moved into [`ProxyConfig::auth`].
    pub fn parse(input: &str) -> Result<Self, StreamError> {
        let input = input.trim();
        let with_scheme = if input.contains("://") {
            input.to_owned()
        } else {
            format!("http://{input}")
        };
        let mut url = Url::parse(&with_scheme).map_err(|e| {
            StreamError::proxy_configuration(format!("invalid proxy URL `{input}`: {e}"))
        })?;

        let scheme = ProxyScheme::from_scheme(url.scheme()).ok_or_else(|| {
            StreamError::proxy_configuration(format!(
                "unsupported proxy scheme `{}`",
                url.scheme()
            ))
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(StreamError::proxy_configuration(format!(
                "proxy URL `{input}` has no host"
            )));
        }

        let auth = (!url.username().is_empty()).then(|| ProxyAuth {
            username: url.username().to_owned(),
            password: url.password().unwrap_or_default().to_owned(),
        });
        // Both only fail for URLs that cannot have a host, ruled out above.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self { url, scheme, auth })
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Builds the `reqwest` proxy. SOCKS credentials travel in the proxy URL,
    /// HTTP ones as `Proxy-Authorization`.
    pub(crate) fn to_proxy(&self) -> Result<Proxy, StreamError> {
        let invalid =
            |e: reqwest::Error| StreamError::proxy_configuration(format!("invalid proxy: {e}"));

        match (&self.auth, self.scheme.is_socks()) {
            (Some(auth), true) => {
                let mut url = self.url.clone();
                if url.set_username(&auth.username).is_err()
                    || url.set_password(Some(&auth.password)).is_err()
                {
                    return Err(StreamError::proxy_configuration(
                        "proxy credentials cannot be applied",
                    ));
                }
                Proxy::all(url.as_str()).map_err(invalid)
            }
            (Some(auth), false) => Ok(Proxy::all(self.url.as_str())
                .map_err(invalid)?
                .basic_auth(&auth.username, &auth.password)),
            (None, _) => Proxy::all(self.url.as_str()).map_err(invalid),
        }
    }
}
