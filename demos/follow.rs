//! Follows a live message stream and logs every message and state change.
//!
//! The target is resolved from the page URL, exactly as a page served at that URL would:
//! `{page}/api/config` is consulted and `/ws` is appended to the chosen base.
//!
//! ```sh
//! RESILIENT_WS_PAGE_URL=http://localhost:3001 RUST_LOG=info,resilient_ws=debug \
//!     cargo run --example follow
//! ```
//!
//! Alternatively pass a socket URL to dial directly:
//! ```sh
//! cargo run --example follow -- ws://localhost:3008/ws
//! ```

use futures::StreamExt as _;
use resilient_ws::endpoint::{Config as EndpointConfig, EndpointTarget, PageEndpoint};
use resilient_ws::ws::{Config, ConnectionManager, JsonParser};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Manager = ConnectionManager<Value, JsonParser>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let manager = match std::env::args().nth(1) {
        Some(url) => Manager::new(EndpointTarget::parse(&url)?, Config::default(), JsonParser)?,
        None => Manager::new(
            PageEndpoint::from_env(EndpointConfig::default())?,
            Config::default(),
            JsonParser,
        )?,
    };

    let mut state = manager.state_receiver();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = %current, "connection state");
        }
    });

    let mut stream = Box::pin(manager.messages().stream(0));
    let mut received = 0_usize;

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(message) = message else { break };
                info!(index = received, %message, "message");
                received += 1;

                if message["type"] == "ping"
                    && let Err(e) = manager.send(&json!({ "type": "pong" }))
                {
                    warn!(error = %e, "could not answer ping");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;

    Ok(())
}
