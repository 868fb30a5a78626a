use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::api::health::{FeedState, HealthState};
use crate::config::WS_PING_INTERVAL_SECS;
use crate::error::Result;
use crate::ingest::TradeQueue;
use crate::ws::messages::{build_subscribe_msg, parse_feed_frame};

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Server closed the stream; reconnect.
    Closed,
    /// Shutdown requested; stop for good.
    Shutdown,
}

/// Owns the single live connection to the activity feed.
///
/// `Disconnected → Connecting → Connected → (error | closed) → Disconnected`, with a
/// fixed delay before every reconnect and no retry cap. Valid trades are offered to
/// the queue without awaiting; everything else on the wire is dropped quietly.
pub struct FeedConnector {
    ws_url: String,
    queue: TradeQueue,
    health: Arc<HealthState>,
    reconnect_delay: Duration,
    shutdown: watch::Receiver<bool>,
    /// Total text frames received since process start.
    frames_received: AtomicU64,
    /// Frames that decoded into a valid trade.
    trades_offered: AtomicU64,
}

impl FeedConnector {
    pub fn new(
        ws_url: String,
        queue: TradeQueue,
        health: Arc<HealthState>,
        reconnect_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url,
            queue,
            health,
            reconnect_delay,
            shutdown,
            frames_received: AtomicU64::new(0),
            trades_offered: AtomicU64::new(0),
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.health.set_feed_state(FeedState::Connecting);
            info!("[FEED] connecting to {}", self.ws_url);
            match self.connect_once().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => info!("[FEED] connection closed by server"),
                Err(e) => error!("[FEED] connection error: {e}"),
            }
            self.health.set_feed_state(FeedState::Disconnected);

            warn!(
                "[FEED] reconnecting in {:.1}s",
                self.reconnect_delay.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        self.health.set_feed_state(FeedState::Disconnected);
        info!("[FEED] connector stopped");
    }

    async fn connect_once(&mut self) -> Result<SessionEnd> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(build_subscribe_msg().into())).await?;
        self.health.set_feed_state(FeedState::Connected);
        info!("[FEED] connected, subscribed to activity/orders_matched");

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("[FEED] ping");
                    write.send(Message::Ping(Vec::new().into())).await?;
                }

                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let total = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if total % 5000 == 0 {
            info!(
                frames = total,
                trades = self.trades_offered.load(Ordering::Relaxed),
                dropped = self.queue.dropped(),
                "[FEED] {total} frames received"
            );
        }

        if let Some(trade) = parse_feed_frame(text) {
            self.trades_offered.fetch_add(1, Ordering::Relaxed);
            self.queue.offer(trade);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::trade_queue;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    const TRADE_FRAME: &str = r#"{"topic":"activity","type":"orders_matched","payload":{"conditionId":"0xc","eventSlug":"e","title":"Will the Fed cut?","outcome":"Yes","price":0.4,"size":9000,"side":"BUY","proxyWallet":"0xw","timestamp":1757908892}}"#;

    /// Local feed server. Each accepted connection reports the first text frame it
    /// receives, optionally pushes a trade, then closes.
    async fn spawn_server(connections: usize) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for n in 0..connections {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        tx.send(text.to_string()).await.unwrap();
                        break;
                    }
                }
                ws.send(Message::Text(r#"{"type":"subscribed"}"#.to_string().into())).await.unwrap();
                if n == 0 {
                    ws.send(Message::Text(TRADE_FRAME.to_string().into())).await.unwrap();
                }
                ws.close(None).await.unwrap();
            }
        });
        (format!("ws://{addr}"), rx)
    }

    #[tokio::test]
    async fn resubscribes_after_close() {
        let (url, mut subs) = spawn_server(2).await;
        let (queue, mut trades) = trade_queue(8);
        let health = Arc::new(HealthState::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connector = FeedConnector::new(
            url,
            queue,
            Arc::clone(&health),
            Duration::from_millis(50),
            shutdown_rx,
        );
        let handle = tokio::spawn(connector.run());

        let timeout = Duration::from_secs(5);
        let first = tokio::time::timeout(timeout, subs.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(timeout, subs.recv()).await.unwrap().unwrap();
        assert_eq!(first, build_subscribe_msg());
        assert_eq!(second, build_subscribe_msg());
        assert!(health.connects() >= 2);

        // Only the trade frame made it to the queue; the ack was dropped.
        let trade = tokio::time::timeout(timeout, trades.recv()).await.unwrap().unwrap();
        assert_eq!(trade.market_id, "0xc");
        assert!(trades.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(timeout, handle).await.unwrap().unwrap();
        assert_eq!(health.feed_state(), FeedState::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_endpoint_keeps_retrying_until_shutdown() {
        // Bind then drop so the port refuses connections.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let (queue, _trades) = trade_queue(8);
        let health = Arc::new(HealthState::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connector = FeedConnector::new(
            format!("ws://{addr}"),
            queue,
            Arc::clone(&health),
            Duration::from_millis(20),
            shutdown_rx,
        );
        let handle = tokio::spawn(connector.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());
        assert_eq!(health.connects(), 0);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
