//! Connection-target resolution.
//!
//! Works out which WebSocket URL a connection attempt should dial, given the page that
//! owns the connection and a best-effort configuration document served next to it.
//!
//! # Resolution rules
//!
//! 1. `GET {page origin}/api/config` and read its `wsUrl` field.
//! 2. A loopback suggestion (`ws://localhost:3008`) is only honoured when the page itself is
//!    on a loopback host; otherwise the page's own host is used.
//! 3. A secure page never dials an insecure socket: `ws` is upgraded to `wss`.
//! 4. Any failure while fetching or reading the document falls back to the page host.
//! 5. `/ws` is appended to the chosen base.
//!
//! # Example
//!
//! ```rust, no_run
//! use resilient_ws::endpoint::{Config, EndpointResolver, PageContext};
//!
//! # async fn example() -> resilient_ws::Result<()> {
//! let resolver = EndpointResolver::new(Config::default())?;
//! let page = PageContext::parse("https://app.example/dashboard")?;
//!
//! let target = resolver.resolve(&page).await;
//! println!("dialing {target}");
//! # Ok(())
//! # }
//! ```

pub mod page;
pub mod resolver;
pub mod types;

pub use page::{PageContext, Protocol};
pub use resolver::{Config, EndpointResolver, EndpointSource, PageEndpoint};
pub use types::{EndpointTarget, ServerConfig};
