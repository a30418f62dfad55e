//! Quota-bounded corpus acquisition from a streaming source.

pub mod cache;
pub mod job;
pub mod orchestrator;
pub mod quota;
pub mod schema;

pub use cache::CacheRegion;
pub use orchestrator::{Orchestrator, RunSummary};
