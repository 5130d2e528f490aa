use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
#[cfg(feature = "tracing")]
use tracing::{debug, warn};
use url::Url;

use super::page::{PageContext, is_loopback};
use super::types::{EndpointTarget, ServerConfig};
use crate::Result;
use crate::error::Error;

const DEFAULT_CONFIG_PATH: &str = "/api/config";
const DEFAULT_SOCKET_PATH: &str = "/ws";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`EndpointResolver`].
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Path of the configuration document, relative to the page origin. Defaults to
    /// `/api/config`.
    #[builder(into, default = DEFAULT_CONFIG_PATH.to_owned())]
    config_path: String,
    /// Path segment appended to the chosen socket base. Defaults to `/ws`.
    #[builder(into, default = DEFAULT_SOCKET_PATH.to_owned())]
    socket_path: String,
    /// Absolute URL of the configuration document, overriding `config_path`.
    /// This is primarily useful when the document is not served by the page origin.
    #[builder(into)]
    config_url: Option<String>,
    /// Upper bound on the configuration fetch. The default is five (5) seconds.
    #[builder(default = DEFAULT_FETCH_TIMEOUT)]
    fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Resolves the socket URL for a connection attempt.
///
/// Resolution never fails: every problem with the configuration document degrades to a
/// socket on the page's own host.
#[derive(Clone, Debug)]
pub struct EndpointResolver {
    config: Config,
    /// Parsed [`Config::config_url`] override
    config_url: Option<Url>,
    client: ReqwestClient,
}

impl EndpointResolver {
    /// # Errors
    ///
    /// Returns an error if the `config_url` override is not a valid URL or the HTTP client
    /// cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "User-Agent",
            HeaderValue::from_static(concat!("resilient-ws/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(config.fetch_timeout)
            .build()?;

        let config_url = config.config_url.as_deref().map(Url::parse).transpose()?;

        Ok(Self {
            config,
            config_url,
            client,
        })
    }

    /// URL of the configuration document for `page`.
    pub fn config_url(&self, page: &PageContext) -> Result<Url> {
        match &self.config_url {
            Some(url) => Ok(url.clone()),
            None => Ok(page.origin().join(&self.config.config_path)?),
        }
    }

    /// Fetch the configuration document served for `page`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, on a non-2xx status or when the body is not a
    /// [`ServerConfig`].
    pub async fn fetch_server_config(&self, page: &PageContext) -> Result<ServerConfig> {
        let request = self
            .client
            .request(Method::GET, self.config_url(page)?)
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Resolve the socket URL to dial for `page`.
    pub async fn resolve(&self, page: &PageContext) -> EndpointTarget {
        let base = match self.suggested_base(page).await {
            Ok(base) => base,
            Err(e) => {
                #[cfg(feature = "tracing")]
                warn!(error = %e, page = %page.origin(), "could not fetch server config, falling back to page host");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
                page.socket_origin()
            }
        };

        let target = EndpointTarget::join(base, &self.config.socket_path);

        #[cfg(feature = "tracing")]
        debug!(%target, "resolved endpoint");

        target
    }

    async fn suggested_base(&self, page: &PageContext) -> Result<Url> {
        let server_config = self.fetch_server_config(page).await?;
        let suggested = normalize_suggestion(&server_config.ws_url)?;

        Ok(reconcile(page, suggested))
    }
}

/// Parse the suggested base, mapping `http`/`https` onto `ws`/`wss`.
fn normalize_suggestion(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::validation(format!(
                "suggested socket base must be ws, wss, http or https, got `{other}`"
            )));
        }
    };

    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(Error::validation(format!(
            "unable to use `{raw}` as a socket base"
        )));
    }

    if url.host().is_none() {
        return Err(Error::validation(format!(
            "suggested socket base `{raw}` has no host"
        )));
    }

    Ok(url)
}

/// Apply the page's constraints to a suggested socket base.
///
/// A loopback suggestion only makes sense to a page that is itself on a loopback host, and a
/// secure page must not dial an insecure socket.
fn reconcile(page: &PageContext, suggested: Url) -> Url {
    let mut base = if is_loopback(&suggested) && !page.is_loopback() {
        #[cfg(feature = "tracing")]
        warn!(%suggested, page = %page.host(), "config returned a loopback host, using page host instead");
        page.socket_origin()
    } else {
        suggested
    };

    if page.is_secure() && base.scheme() == "ws" {
        // ws -> wss cannot fail, both are special schemes
        _ = base.set_scheme("wss");
    }

    base
}

/// Source of the socket URL for each connection attempt.
///
/// [`ConnectionManager`](crate::ws::ConnectionManager) asks its source once per attempt and
/// never caches the answer.
#[async_trait]
pub trait EndpointSource: Send + Sync + 'static {
    async fn endpoint(&self) -> EndpointTarget;
}

/// A fixed target, for servers whose socket URL is already known.
#[async_trait]
impl EndpointSource for EndpointTarget {
    async fn endpoint(&self) -> EndpointTarget {
        self.clone()
    }
}

#[async_trait]
impl<S: EndpointSource> EndpointSource for Arc<S> {
    async fn endpoint(&self) -> EndpointTarget {
        self.as_ref().endpoint().await
    }
}

/// Resolves against the current page context on every attempt.
///
/// The page context can be replaced while a connection is live; the next attempt picks the
/// new one up.
#[derive(Debug)]
pub struct PageEndpoint {
    resolver: EndpointResolver,
    page: RwLock<PageContext>,
}

impl PageEndpoint {
    #[must_use]
    pub fn new(resolver: EndpointResolver, page: PageContext) -> Self {
        Self {
            resolver,
            page: RwLock::new(page),
        }
    }

    /// Build a resolver from `config` and read the page from
    /// [`PAGE_URL_VAR`](crate::PAGE_URL_VAR).
    pub fn from_env(config: Config) -> Result<Self> {
        Ok(Self::new(
            EndpointResolver::new(config)?,
            PageContext::from_env()?,
        ))
    }

    #[must_use]
    pub fn page(&self) -> PageContext {
        self.page
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_page(&self, page: PageContext) {
        *self.page.write().unwrap_or_else(PoisonError::into_inner) = page;
    }

    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }
}

#[async_trait]
impl EndpointSource for PageEndpoint {
    async fn endpoint(&self) -> EndpointTarget {
        let page = self.page();
        self.resolver.resolve(&page).await
    }
}
