pub mod geo;
pub mod judge;
pub mod pipeline;
pub mod quality;
pub mod scheduler;
pub mod storage;
pub mod verifier;

pub use pipeline::{Pipeline, RefreshOutcome};
