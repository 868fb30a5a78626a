pub mod market_store;

pub use market_store::MarketStore;
