use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration document served at the configuration path (`/api/config` by default).
///
/// Only the suggested socket base is read; other fields are tolerated.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Suggested base URL for the socket, e.g. `ws://localhost:3008`
    pub ws_url: String,
}

impl ServerConfig {
    #[must_use]
    pub fn new<S: Into<String>>(ws_url: S) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

/// Fully-qualified socket URL for one connection attempt (`ws(s)://host[:port]/.../ws`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointTarget(Url);

impl EndpointTarget {
    /// Parse a complete `ws`/`wss` URL to dial as-is.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `url` cannot be parsed or is not a WebSocket URL.
    pub fn parse(url: &str) -> crate::Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self(url)),
            other => Err(crate::error::Error::validation(format!(
                "endpoint must use ws or wss, got `{other}`"
            ))),
        }
    }

    /// Append `socket_path` to `base`, dropping the base's query and fragment.
    pub(crate) fn join(mut base: Url, socket_path: &str) -> Self {
        let path = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            socket_path.trim_start_matches('/')
        );
        base.set_path(&path);
        base.set_query(None);
        base.set_fragment(None);
        Self(base)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.0.scheme() == "wss"
    }
}

impl fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EndpointTarget> for Url {
    fn from(target: EndpointTarget) -> Self {
        target.0
    }
}
