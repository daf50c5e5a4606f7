//! Live result fan-out.
//!
//! One ingestion point (the result consumer) feeds a `broadcast` channel.
//! Every subscriber holds its own receiver, so a slow viewer only loses its
//! own backlog and never stalls ingestion or other viewers. Dropping a
//! subscription releases its cursor.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;

use armada_core::ResultEvent;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ResultFanout {
    tx: broadcast::Sender<Arc<ResultEvent>>,
}

impl Default for ResultFanout {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResultFanout {
    /// `capacity` is the per-subscriber backlog before the oldest events
    /// are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Hand an event to every current subscriber. Returns how many there
    /// were; zero is not an error.
    pub fn publish(&self, event: ResultEvent) -> usize {
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> ResultSubscription {
        ResultSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One viewer's cursor.
pub struct ResultSubscription {
    rx: broadcast::Receiver<Arc<ResultEvent>>,
    dropped: u64,
}

impl ResultSubscription {
    /// Next event. Lagging skips ahead to the oldest retained event.
    /// `None` once the fan-out is gone.
    pub async fn next(&mut self) -> Option<Arc<ResultEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(skipped = n, total = self.dropped, "slow result subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscriber missed by lagging.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<ResultEvent>> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}
