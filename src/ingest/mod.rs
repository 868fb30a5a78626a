pub mod consumer;
pub mod queue;

pub use consumer::{IngestStats, Ingestor, TradeConsumer};
pub use queue::{trade_queue, TradeQueue};
