use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::Result;
use crate::error::Error;

/// Protocol the owning page was loaded over.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// WebSocket scheme matching this page protocol's security level.
    #[must_use]
    pub const fn socket_scheme(self) -> &'static str {
        match self {
            Self::Http => "ws",
            Self::Https => "wss",
        }
    }

    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Ambient context of the page that owns the connection: its protocol and `host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    protocol: Protocol,
    /// `http(s)://host[:port]/`
    origin: Url,
    /// `ws(s)://host[:port]/`, the fallback socket base
    socket_origin: Url,
}

impl PageContext {
    /// Create a page context from a protocol and a `host[:port]` string.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `host` is empty or carries anything besides a host and
    /// an optional port.
    pub fn new(protocol: Protocol, host: &str) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::validation("page host must not be empty"));
        }

        let origin = Url::parse(&format!("{protocol}://{host}"))?;
        if origin.path() != "/"
            || origin.query().is_some()
            || origin.fragment().is_some()
            || !origin.username().is_empty()
            || origin.password().is_some()
        {
            return Err(Error::validation(format!(
                "page host must be `host[:port]`, got `{host}`"
            )));
        }

        let socket_origin = Url::parse(&format!(
            "{}://{}",
            protocol.socket_scheme(),
            authority(&origin)
        ))?;

        Ok(Self {
            protocol,
            origin,
            socket_origin,
        })
    }

    /// Create a page context from the page's full URL; path, query and fragment are ignored.
    ///
    /// ```
    /// use resilient_ws::endpoint::{PageContext, Protocol};
    ///
    /// let page = PageContext::parse("https://app.example:8443/settings?tab=1").unwrap();
    /// assert_eq!(page.protocol(), Protocol::Https);
    /// assert_eq!(page.host(), "app.example:8443");
    /// ```
    pub fn parse(page_url: &str) -> Result<Self> {
        let url = Url::parse(page_url)?;
        let protocol = match url.scheme() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => {
                return Err(Error::validation(format!(
                    "page URL must be http or https, got `{other}`"
                )));
            }
        };

        Self::new(protocol, &authority(&url))
    }

    /// Create a page context from [`PAGE_URL_VAR`](crate::PAGE_URL_VAR).
    pub fn from_env() -> Result<Self> {
        let page_url = std::env::var(crate::PAGE_URL_VAR).map_err(|e| {
            Error::validation(format!("unable to read {}: {e}", crate::PAGE_URL_VAR))
        })?;
        Self::parse(&page_url)
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol.is_secure()
    }

    /// The page's `host[:port]`, with default ports omitted.
    #[must_use]
    pub fn host(&self) -> String {
        authority(&self.origin)
    }

    /// Whether the page itself is being viewed via a loopback host.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        is_loopback(&self.origin)
    }

    /// The page origin, `http(s)://host[:port]/`.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// WebSocket base synthesized from the page host with the matching security level.
    pub(crate) fn socket_origin(&self) -> Url {
        self.socket_origin.clone()
    }
}

/// `host[:port]` of a URL; the port is omitted when it is the scheme default.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// Whether `url` points at a loopback host: `localhost`, `*.localhost`, `127.0.0.0/8` or `::1`.
pub(crate) fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => Ipv4Addr::is_loopback(&ip),
        Some(Host::Ipv6(ip)) => Ipv6Addr::is_loopback(&ip),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_keeps_host_and_port() {
        let page = PageContext::new(Protocol::Http, "app.example:3001").unwrap();

        assert_eq!(page.host(), "app.example:3001");
        assert_eq!(page.origin().as_str(), "http://app.example:3001/");
        assert_eq!(page.socket_origin().as_str(), "ws://app.example:3001/");
        assert!(!page.is_secure());
    }

    #[test]
    fn default_port_is_dropped() {
        let page = PageContext::new(Protocol::Https, "app.example:443").unwrap();

        assert_eq!(page.host(), "app.example");
        assert_eq!(page.socket_origin().as_str(), "wss://app.example/");
    }

    #[test]
    fn new_rejects_paths_and_empty_hosts() {
        PageContext::new(Protocol::Http, "").unwrap_err();
        PageContext::new(Protocol::Http, "app.example/ws").unwrap_err();
        PageContext::new(Protocol::Http, "user@app.example").unwrap_err();
    }

    #[test]
    fn parse_ignores_path_and_query() {
        let page = PageContext::parse("https://App.Example/dashboard?tab=2#top").unwrap();

        assert_eq!(page.protocol(), Protocol::Https);
        assert_eq!(page.host(), "app.example");
    }

    #[test]
    fn parse_rejects_non_http_pages() {
        let error = PageContext::parse("file:///index.html").unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Validation);

        PageContext::parse("ws://app.example").unwrap_err();
    }

    #[test]
    fn loopback_detection() {
        for url in [
            "ws://localhost:9000",
            "ws://LOCALHOST",
            "ws://api.localhost",
            "ws://127.0.0.1:3008",
            "ws://127.1.2.3",
            "ws://[::1]:3008",
        ] {
            assert!(is_loopback(&Url::parse(url).unwrap()), "{url} is loopback");
        }

        for url in [
            "ws://app.example",
            "ws://localhost.example.com",
            "ws://10.0.0.1",
            "ws://[2001:db8::1]",
        ] {
            assert!(!is_loopback(&Url::parse(url).unwrap()), "{url} is not loopback");
        }
    }

    #[test]
    fn page_loopback() {
        assert!(PageContext::new(Protocol::Http, "localhost:3001").unwrap().is_loopback());
        assert!(!PageContext::new(Protocol::Https, "app.example").unwrap().is_loopback());
    }

    #[test]
    fn protocol_display_and_scheme() {
        assert_eq!(Protocol::Https.to_string(), "https");
        assert_eq!(Protocol::Http.socket_scheme(), "ws");
        assert_eq!(Protocol::Https.socket_scheme(), "wss");
    }
}
