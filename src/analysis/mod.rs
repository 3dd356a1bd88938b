pub mod consensus;
pub mod sentiment;
pub mod stats;

pub use consensus::{ConsensusMaps, build_consensus, consolidate_entities, consolidate_sources};
pub use sentiment::{SentimentAnalysis, SentimentAnalyzer};
pub use stats::{EntityReport, RunStatistics, UrlReport};
