//! Result stream: fan-out of probe results to any number of subscribers.
//!
//! Publishing never waits on subscribers. A subscriber that falls more than
//! `capacity` results behind skips the oldest ones and keeps going.

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::registry::ProbeResult;

pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ResultStream {
    tx: broadcast::Sender<ProbeResult>,
}

impl Default for ResultStream {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl ResultStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a result. Returns how many subscribers will see it.
    pub fn publish(&self, result: ProbeResult) -> usize {
        // No subscribers is not an error
        self.tx.send(result).unwrap_or(0)
    }

    /// Subscribe to results published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One consumer's view of the stream.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ProbeResult>,
    skipped: u64,
}

impl Subscription {
    /// Next result, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<ProbeResult> {
        loop {
            match self.rx.recv().await {
                Ok(result) => return Some(result),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered result without waiting.
    pub fn try_recv(&mut self) -> Option<ProbeResult> {
        loop {
            match self.rx.try_recv() {
                Ok(result) => return Some(result),
                Err(TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total results this subscriber missed by lagging.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_stream(self) -> impl Stream<Item = ProbeResult> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|result| (result, sub))
        })
    }

    fn note_lag(&mut self, n: u64) {
        self.skipped += n;
        tracing::warn!("Result subscriber lagged, skipped {} results", n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Target;
    use chrono::Utc;
    use futures::StreamExt;

    fn result(id: &str, latency: f64) -> ProbeResult {
        ProbeResult::success(&Target::tcp(id, "h", 1), latency, Utc::now())
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_result_in_order() {
        let stream = ResultStream::new(16);
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();

        assert_eq!(stream.publish(result("x", 1.0)), 2);
        assert_eq!(stream.publish(result("y", 2.0)), 2);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.unwrap().target_id, "x");
            assert_eq!(sub.recv().await.unwrap().target_id, "y");
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let stream = ResultStream::default();
        assert_eq!(stream.publish(result("x", 1.0)), 0);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_skips_oldest() {
        let stream = ResultStream::new(2);
        let mut sub = stream.subscribe();

        for i in 0..5 {
            stream.publish(result(&format!("t{}", i), i as f64));
        }

        assert_eq!(sub.try_recv().unwrap().target_id, "t3");
        assert_eq!(sub.try_recv().unwrap().target_id, "t4");
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.skipped(), 3);
    }

    #[tokio::test]
    async fn test_stream_ends_when_publishers_drop() {
        let stream = ResultStream::new(4);
        let sub = stream.subscribe();
        stream.publish(result("x", 1.0));
        drop(stream);

        let collected: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(collected.len(), 1);
    }
}
