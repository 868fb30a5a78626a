pub mod classifier;
pub mod keywords;
pub mod pipeline;
pub mod semantic;

pub use classifier::TierThresholds;
pub use pipeline::{FilterOutcome, FilterPipeline, Rejection};
pub use semantic::{LlmSemanticFilter, PassThrough, SemanticFilter};
