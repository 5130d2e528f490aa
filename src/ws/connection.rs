#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::Debug;
use std::future::pending;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, error, info, trace, warn};

use super::config::{Config, Schedule};
use super::error::WsError;
use super::log::MessageLog;
use super::traits::MessageParser;
use crate::endpoint::{EndpointSource, EndpointTarget};
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ConnectionState {
    /// Not connected; a reconnect may be scheduled
    Disconnected,
    /// Resolving the endpoint or opening the transport
    Connecting,
    /// Transport open, sends are accepted
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Handle to the live transport connection. Frames sent here are written by the driver.
#[derive(Debug, Clone)]
struct ActiveConnection {
    endpoint: EndpointTarget,
    outbound: mpsc::UnboundedSender<Message>,
}

/// State the driver publishes and the manager reads.
#[derive(Debug)]
struct Shared<M> {
    state_tx: watch::Sender<ConnectionState>,
    active: RwLock<Option<ActiveConnection>>,
    log: Arc<MessageLog<M>>,
    cancel: CancellationToken,
}

impl<M> Shared<M> {
    /// Publish a state. After teardown only `Disconnected` is accepted; the check runs under
    /// the channel lock so it cannot interleave with teardown's own update.
    fn transition(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state
                || (self.cancel.is_cancelled() && state != ConnectionState::Disconnected)
            {
                return false;
            }

            #[cfg(feature = "tracing")]
            debug!(from = %current, to = %state, "connection state changed");
            *current = state;
            true
        });
    }

    fn set_active(&self, active: Option<ActiveConnection>) {
        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() && self.cancel.is_cancelled() {
            return;
        }
        *slot = active;
    }

    fn active(&self) -> Option<ActiveConnection> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
enum Command {
    Start,
}

/// What ended a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// The transport closed or never opened; a retry is due
    Closed,
    /// Teardown was requested
    TornDown,
}

/// Keeps one logical message stream alive across transport drops.
///
/// The manager owns at most one transport connection at a time and reconnects after every
/// closure according to its [`ReconnectPolicy`](super::config::ReconnectPolicy) (a fixed
/// three second delay by default, retried forever). Every attempt asks the
/// [`EndpointSource`] for a fresh target.
///
/// Construction starts the first attempt. Dropping the manager tears it down: the pending
/// reconnect is cancelled, the live connection is closed and nothing reconnects afterwards.
///
/// # Type Parameters
///
/// - `M`: Decoded message type, e.g. [`serde_json::Value`]
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```rust, no_run
/// use resilient_ws::endpoint::{Config as EndpointConfig, EndpointResolver, PageContext, PageEndpoint};
/// use resilient_ws::ws::{Config, ConnectionManager, ConnectionState, JsonParser};
/// use serde_json::{Value, json};
///
/// # async fn example() -> resilient_ws::Result<()> {
/// let page = PageContext::parse("https://app.example")?;
/// let source = PageEndpoint::new(EndpointResolver::new(EndpointConfig::default())?, page);
///
/// let connection: ConnectionManager<Value, JsonParser> =
///     ConnectionManager::new(source, Config::default(), JsonParser)?;
///
/// let mut state = connection.state_receiver();
/// state.wait_for(|s| *s == ConnectionState::Connected).await.ok();
///
/// connection.send(&json!({ "type": "hello" }))?;
/// println!("received so far: {:?}", connection.messages().snapshot());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    shared: Arc<Shared<M>>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    /// Phantom data for the parser, which lives in the driver task
    _phantom: PhantomData<P>,
}

impl<M, P> ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    /// Create a connection manager and start connecting.
    ///
    /// The driver runs as a task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error when called outside a tokio runtime.
    pub fn new<S: EndpointSource>(source: S, config: Config, parser: P) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::validation(format!("connection manager needs a tokio runtime: {e}"))
        })?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            state_tx,
            active: RwLock::new(None),
            log: Arc::new(MessageLog::new()),
            cancel: cancel.clone(),
        });

        let driver = Driver {
            source: Box::new(source),
            schedule: config.reconnect.schedule(),
            parser,
            shared: Arc::clone(&shared),
            commands: commands_rx,
            cancel: cancel.clone(),
        };
        let driver = runtime.spawn(driver.run());

        let manager = Self {
            shared,
            commands: commands_tx,
            cancel,
            driver: Some(driver),
            _phantom: PhantomData,
        };
        manager.start();

        Ok(manager)
    }

    /// Connect now.
    ///
    /// While disconnected this cancels any scheduled reconnect and starts an attempt
    /// immediately. While connecting or connected, and after teardown, it does nothing.
    pub fn start(&self) {
        if self.cancel.is_cancelled() {
            #[cfg(feature = "tracing")]
            debug!("start ignored, connection manager torn down");
            return;
        }

        if self.state() != ConnectionState::Disconnected {
            #[cfg(feature = "tracing")]
            trace!(state = %self.state(), "start ignored, already connecting or connected");
            return;
        }

        // The driver only exits after cancellation
        _ = self.commands.send(Command::Start);
    }

    /// Serialize `payload` as JSON and send it as a text frame.
    ///
    /// Fire-and-forget: the frame is handed to the live connection. Nothing is queued for a
    /// later connection, so a payload sent while not connected is simply not sent.
    ///
    /// # Errors
    ///
    /// [`WsError::NotConnected`] unless the state is [`ConnectionState::Connected`], or an
    /// internal error if `payload` fails to serialize.
    pub fn send<R: Serialize>(&self, payload: &R) -> Result<()> {
        let active = match self.shared.active() {
            Some(active) if self.state().is_connected() => active,
            _ => {
                #[cfg(feature = "tracing")]
                warn!("WebSocket not connected, dropping outbound message");
                return Err(WsError::NotConnected.into());
            }
        };

        let json = serde_json::to_string(payload)?;

        #[cfg(feature = "tracing")]
        trace!(%json, endpoint = %active.endpoint, "sending message");

        active
            .outbound
            .send(Message::Text(json.into()))
            .map_err(|_e| WsError::NotConnected)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Read-only view of every message received, across reconnects.
    #[must_use]
    pub fn messages(&self) -> Arc<MessageLog<M>> {
        Arc::clone(&self.shared.log)
    }

    /// Endpoint of the live connection, if there is one.
    #[must_use]
    pub fn active_endpoint(&self) -> Option<EndpointTarget> {
        self.shared.active().map(|active| active.endpoint)
    }

    /// Stop for good: cancel any scheduled reconnect and close the live connection.
    ///
    /// Idempotent. The state is `Disconnected` on return; the close handshake finishes in
    /// the background (await [`shutdown`](Self::shutdown) to wait for it).
    pub fn teardown(&self) {
        if !self.cancel.is_cancelled() {
            #[cfg(feature = "tracing")]
            info!("tearing down connection manager");
        }

        self.cancel.cancel();
        self.shared.set_active(None);
        self.shared.transition(ConnectionState::Disconnected);
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear down and wait for the connection to finish closing.
    pub async fn shutdown(mut self) {
        self.teardown();

        if let Some(driver) = self.driver.take()
            && let Err(e) = driver.await
        {
            #[cfg(feature = "tracing")]
            error!(error = %e, "connection driver task failed");
            #[cfg(not(feature = "tracing"))]
            let _: &tokio::task::JoinError = &e;
        }
    }
}

impl<M, P> Drop for ConnectionManager<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The single task that owns the transport, the reconnect timer and all state transitions.
struct Driver<M, P> {
    source: Box<dyn EndpointSource>,
    schedule: Schedule,
    parser: P,
    shared: Arc<Shared<M>>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl<M, P> Driver<M, P>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
{
    async fn run(mut self) {
        // At most one pending reconnect, and only while disconnected
        let mut retry: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        if retry.take().is_some() {
                            #[cfg(feature = "tracing")]
                            debug!("start requested, cancelled pending reconnect");
                        }
                    }
                    None => break,
                },

                () = expired(&mut retry) => {
                    #[cfg(feature = "tracing")]
                    debug!("reconnect timer fired");
                }
            }

            match self.attempt().await {
                Flow::TornDown => break,
                Flow::Closed => {
                    let delay = self.schedule.next_delay();
                    #[cfg(feature = "tracing")]
                    info!(?delay, "connection closed, scheduling reconnect");
                    retry = Some(Box::pin(sleep(delay)));
                }
            }
        }

        self.shared.set_active(None);
        self.shared.transition(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        debug!("connection driver stopped");
    }

    /// One connection attempt, from resolution until the transport closes.
    async fn attempt(&mut self) -> Flow {
        self.shared.transition(ConnectionState::Connecting);

        let endpoint = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Flow::TornDown,
            endpoint = self.source.endpoint() => endpoint,
        };

        #[cfg(feature = "tracing")]
        info!(%endpoint, "connecting");

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Flow::TornDown,
            result = connect_async(endpoint.as_str()) => result,
        };

        let stream = match connected {
            Ok((stream, _response)) => stream,
            Err(e) => {
                // A failed open is reported as an error, then handled as a closure
                let error = Error::from(e);
                #[cfg(feature = "tracing")]
                warn!(%endpoint, error = %error, "unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &error;
                self.disconnected();
                return Flow::Closed;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.shared.set_active(Some(ActiveConnection {
            endpoint: endpoint.clone(),
            outbound: outbound_tx,
        }));
        self.shared.transition(ConnectionState::Connected);
        self.schedule.reset();

        #[cfg(feature = "tracing")]
        info!(%endpoint, "connected");

        let flow = self.session(stream, outbound_rx).await;

        self.shared.set_active(None);
        self.disconnected();

        flow
    }

    /// Publish `Disconnected`, first discarding starts requested while connecting or
    /// connected. Starts issued after the state is visible are kept.
    fn disconnected(&mut self) {
        while self.commands.try_recv().is_ok() {}
        self.shared.transition(ConnectionState::Disconnected);
    }

    /// Pump frames both ways until the connection closes or teardown is requested.
    async fn session(
        &mut self,
        stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) -> Flow {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    close_for_teardown(&mut write).await;
                    return Flow::TornDown;
                }

                // Outbound before inbound so a busy server cannot starve sends
                Some(message) = outbound.recv() => {
                    // A peer that stopped reading must not block teardown
                    let sent = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            close_for_teardown(&mut write).await;
                            return Flow::TornDown;
                        }
                        sent = write.send(message) => sent,
                    };

                    if let Err(e) = sent {
                        #[cfg(feature = "tracing")]
                        error!(error = %e, "failed to send frame");
                        if closes_connection(&e) {
                            return Flow::Closed;
                        }
                    }
                }

                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        #[cfg(feature = "tracing")]
                        trace!("already connected, ignoring start");
                    }
                    None => return Flow::TornDown,
                },

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_message(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => {
                        #[cfg(feature = "tracing")]
                        debug!(len = bytes.len(), "dropping binary frame");
                        #[cfg(not(feature = "tracing"))]
                        drop(bytes);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        info!(?frame, "server closed connection");
                        #[cfg(not(feature = "tracing"))]
                        drop(frame);
                        return Flow::Closed;
                    }
                    Some(Ok(_)) => {
                        // Ping and pong are answered by the transport
                    }
                    Some(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        error!(error = %e, "WebSocket transport error");
                        if closes_connection(&e) {
                            return Flow::Closed;
                        }
                    }
                    None => {
                        #[cfg(feature = "tracing")]
                        info!("connection ended");
                        return Flow::Closed;
                    }
                },
            }
        }
    }

    fn on_message(&self, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Ok(message) => {
                #[cfg(feature = "tracing")]
                trace!(?message, "received message");
                self.shared.log.push(message);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                error!(
                    error = %e,
                    frame = %String::from_utf8_lossy(bytes),
                    "dropping malformed frame"
                );
                #[cfg(not(feature = "tracing"))]
                let _: &WsError = &e;
            }
        }
    }
}

/// Start the close handshake, giving up after [`CLOSE_TIMEOUT`].
async fn close_for_teardown<S>(write: &mut S)
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match timeout(CLOSE_TIMEOUT, write.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            #[cfg(feature = "tracing")]
            debug!(error = %e, "error closing connection during teardown");
            #[cfg(not(feature = "tracing"))]
            let _: &tungstenite::Error = &e;
        }
        Err(_elapsed) => {
            #[cfg(feature = "tracing")]
            debug!(
                timeout = ?CLOSE_TIMEOUT,
                "peer did not acknowledge close, dropping connection"
            );
        }
    }
}

/// Resolves once the pending reconnect delay elapses; never while none is pending.
async fn expired(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

/// Transport errors after which the connection cannot be used again.
fn closes_connection(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(_)
    )
}
