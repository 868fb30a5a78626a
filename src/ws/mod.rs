pub mod connection;
pub mod messages;

pub use connection::FeedConnector;
