use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::TradeEvent;

/// Producer half of the bounded trade FIFO. Offers never block: when the queue is
/// full the trade is dropped and counted.
#[derive(Clone)]
pub struct TradeQueue {
    tx: mpsc::Sender<TradeEvent>,
    dropped: Arc<AtomicU64>,
}

/// Create the queue. The receiver must have exactly one consumer.
pub fn trade_queue(capacity: usize) -> (TradeQueue, mpsc::Receiver<TradeEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        TradeQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl TradeQueue {
    /// Returns false if the trade was dropped (queue full or consumer gone).
    pub fn offer(&self, trade: TradeEvent) -> bool {
        match self.tx.try_send(trade) {
            Ok(()) => true,
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    warn!(dropped, "[QUEUE] trade queue full, dropping trades: {e}");
                } else {
                    debug!(dropped, "[QUEUE] dropped trade: {e}");
                }
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items currently waiting for the consumer.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn trade(n: usize) -> TradeEvent {
        TradeEvent {
            market_id: format!("m{n}"),
            event_slug: "e".to_string(),
            title: "t".to_string(),
            outcome: "Yes".to_string(),
            price: 0.5,
            size_usd: 10_000.0,
            wallet: "0x".to_string(),
            side: Side::Buy,
            outcome_index: 0,
            tx_hash: None,
            trader_name: None,
            timestamp: n as i64,
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking_and_keeps_fifo() {
        let (queue, mut rx) = trade_queue(4);
        for n in 0..4 {
            assert!(queue.offer(trade(n)));
        }
        assert_eq!(queue.depth(), 4);

        // Returns immediately; no await involved.
        assert!(!queue.offer(trade(99)));
        assert_eq!(queue.dropped(), 1);

        for n in 0..4 {
            let t = rx.recv().await.unwrap();
            assert_eq!(t.market_id, format!("m{n}"));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offer_after_consumer_gone_is_dropped() {
        let (queue, rx) = trade_queue(2);
        drop(rx);
        assert!(!queue.offer(trade(0)));
        assert_eq!(queue.dropped(), 1);
    }
}
