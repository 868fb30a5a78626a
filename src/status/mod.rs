pub mod reporter;

pub use reporter::{StatusReporter, StatusSources, StatusSummary};
