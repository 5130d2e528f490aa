use std::sync::{Arc, PoisonError, RwLock};

use futures::Stream;
use tokio::sync::{broadcast, watch};

/// Broadcast channel capacity for live message fan-out.
const BROADCAST_CAPACITY: usize = 1024;

/// Append-only record of every decoded inbound message, in arrival order.
///
/// Only the connection manager appends; callers get read access plus change notification.
/// The log is never truncated, so a long-lived manager on a chatty connection grows
/// without bound. Consumers that only care about recent traffic should follow
/// [`subscribe`](Self::subscribe) or [`stream`](Self::stream) and keep their own window.
#[derive(Debug)]
pub struct MessageLog<M> {
    entries: RwLock<Vec<M>>,
    /// Current length, bumped after every append
    len_tx: watch::Sender<usize>,
    broadcast_tx: broadcast::Sender<M>,
}

impl<M> MessageLog<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            entries: RwLock::new(Vec::new()),
            len_tx,
            broadcast_tx,
        }
    }

    /// Append a message and notify observers.
    pub(crate) fn push(&self, message: M) {
        let len = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.push(message.clone());
            entries.len()
        };

        // No live subscribers is fine, the entry is already recorded
        _ = self.broadcast_tx.send(message);
        self.len_tx.send_replace(len);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<M> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Copy of every message received so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<M> {
        self.since(0)
    }

    /// Copy of the messages at `index` and after.
    #[must_use]
    pub fn since(&self, index: usize) -> Vec<M> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index..)
            .map(<[M]>::to_vec)
            .unwrap_or_default()
    }

    /// Receiver that is notified with the new length after every append.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Live fan-out of new messages.
    ///
    /// Each call returns a new independent receiver. A receiver that falls more than
    /// 1024 messages behind observes [`broadcast::error::RecvError::Lagged`]; the log itself
    /// still holds everything.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.broadcast_tx.subscribe()
    }

    /// Every message from `index` onwards, waiting for new ones as they arrive.
    ///
    /// Reads from the log rather than the broadcast channel, so it never skips entries. The
    /// stream does not end on its own.
    pub fn stream(self: &Arc<Self>, index: usize) -> impl Stream<Item = M> + Send + 'static {
        let log = Arc::clone(self);
        let mut len_rx = log.watch();

        async_stream::stream! {
            let mut next = index;
            loop {
                // Mark seen before reading so an append racing the read still wakes us
                drop(len_rx.borrow_and_update());
                let batch = log.since(next);
                next += batch.len();
                for message in batch {
                    yield message;
                }

                if len_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}
