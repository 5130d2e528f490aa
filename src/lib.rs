#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod endpoint;
pub mod error;
pub(crate) mod serde_helpers;
pub mod ws;

use reqwest::{Request, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the URL of the page that owns the connection,
/// e.g. `https://app.example/dashboard`. Read by [`endpoint::PageContext::from_env`].
pub const PAGE_URL_VAR: &str = "RESILIENT_WS_PAGE_URL";

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "HTTP request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    if status_code == StatusCode::NO_CONTENT {
        return Err(Error::status(
            status_code,
            method,
            path,
            "Response carried no document",
        ));
    }

    let json_value = response.json::<serde_json::Value>().await?;
    serde_helpers::deserialize_with_warnings(json_value)
}
