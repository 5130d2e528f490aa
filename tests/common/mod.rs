#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt as _, StreamExt as _};
use resilient_ws::endpoint::EndpointTarget;
use resilient_ws::ws::{Config, ConnectionState, ReconnectPolicy};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Reconnect delay used by the connection tests in place of the three second default.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(3);

#[must_use]
pub fn config() -> Config {
    let mut config = Config::default();
    config.reconnect = ReconnectPolicy::fixed(RECONNECT_DELAY);
    config
}

/// Instruction broadcast to every live connection.
#[derive(Debug, Clone)]
enum Control {
    Text(String),
    Binary(Vec<u8>),
    /// Close handshake initiated by the server
    Close,
    /// Drop the TCP stream without a close frame
    Abort,
    /// Write this text frame back to back until the connection ends
    Flood(String),
    /// Stop reading client frames so their writes back up
    Stall,
}

/// Mock WebSocket server that records every connection and can close them on demand.
pub struct MockWsServer {
    addr: SocketAddr,
    control_tx: broadcast::Sender<Control>,
    /// Time of every TCP accept, including refused handshakes
    attempts_rx: mpsc::UnboundedReceiver<Instant>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    handshakes: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (control_tx, _) = broadcast::channel::<Control>(100);
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));
        let refusing = Arc::new(AtomicBool::new(false));

        let server = Self {
            addr,
            control_tx: control_tx.clone(),
            attempts_rx,
            received_rx,
            handshakes: Arc::clone(&handshakes),
            live: Arc::clone(&live),
            max_live: Arc::clone(&max_live),
            refusing: Arc::clone(&refusing),
        };

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                drop(attempts_tx.send(Instant::now()));

                if refusing.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }

                // Subscribe before the handshake so nothing sent after `Connected` is missed
                let mut control_rx = control_tx.subscribe();

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                handshakes.fetch_add(1, Ordering::SeqCst);
                let now_live = live.fetch_add(1, Ordering::SeqCst) + 1;
                max_live.fetch_max(now_live, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let live = Arc::clone(&live);

                tokio::spawn(async move {
                    let mut flood: Option<String> = None;
                    let mut stalled = false;
                    loop {
                        tokio::select! {
                            sent = write.send(Message::Text(
                                flood.clone().unwrap_or_default().into(),
                            )), if flood.is_some() => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                            msg = read.next(), if !stalled => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            control = control_rx.recv() => {
                                let sent = match control {
                                    Ok(Control::Text(text)) => write.send(Message::Text(text.into())).await,
                                    Ok(Control::Binary(bytes)) => write.send(Message::Binary(bytes.into())).await,
                                    Ok(Control::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Ok(Control::Flood(text)) => {
                                        flood = Some(text);
                                        Ok(())
                                    }
                                    Ok(Control::Stall) => {
                                        stalled = true;
                                        Ok(())
                                    }
                                    Ok(Control::Abort) | Err(_) => break,
                                };
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }

                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        server
    }

    #[must_use]
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// `ws://127.0.0.1:{port}`, the shape a configuration document suggests.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointTarget {
        EndpointTarget::parse(&self.ws_url("/ws")).unwrap()
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.control_tx.send(Control::Text(message.to_owned())));
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        drop(self.control_tx.send(Control::Binary(bytes.to_vec())));
    }

    /// Stream `message` to every live connection as fast as the socket allows.
    pub fn flood(&self, message: &str) {
        drop(self.control_tx.send(Control::Flood(message.to_owned())));
    }

    /// Stop reading from every live connection. The connections stay open.
    pub fn stall(&self) {
        drop(self.control_tx.send(Control::Stall));
    }

    /// Close every live connection with a close frame.
    pub fn close_all(&self) {
        drop(self.control_tx.send(Control::Close));
    }

    /// Drop every live connection without a close frame.
    pub fn abort_all(&self) {
        drop(self.control_tx.send(Control::Abort));
    }

    /// While refusing, new TCP connections are dropped before the handshake.
    pub fn refuse(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Wait for the next connection attempt to reach the server.
    pub async fn next_attempt(&mut self) -> Option<Instant> {
        timeout(WAIT, self.attempts_rx.recv()).await.ok().flatten()
    }

    /// Non-blocking check for a connection attempt.
    pub fn try_next_attempt(&mut self) -> Option<Instant> {
        self.attempts_rx.try_recv().ok()
    }

    /// Receive the next text frame sent by a client.
    pub async fn recv_text(&mut self) -> Option<String> {
        timeout(WAIT, self.received_rx.recv()).await.ok().flatten()
    }

    /// Non-blocking check for a received text frame.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.received_rx.try_recv().ok()
    }

    /// Completed handshakes so far.
    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most connections that were ever open at the same time.
    #[must_use]
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Wait until no connection is open.
    pub async fn wait_idle(&self) {
        timeout(WAIT, async {
            while self.live() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

/// Wait for `state`, returning when it was observed.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    state: ConnectionState,
) -> Instant {
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
    Instant::now()
}

/// Wait for a message log to reach `len` entries.
pub async fn wait_for_len(rx: &mut watch::Receiver<usize>, len: usize) {
    timeout(WAIT, rx.wait_for(|n| *n >= len))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {len} messages"))
        .unwrap();
}
