pub mod prompt;
pub mod scheduler;

pub use scheduler::{AnalysisCounters, AnalysisScheduler};
