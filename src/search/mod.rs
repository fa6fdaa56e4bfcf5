//! Adaptive capacity search over concurrency levels or target rates.
mod engine;
mod types;


pub use engine::PerformanceSearch;
pub use types::{
    RampKind, RampStrategy, SearchAxis, SearchConfig, SearchOutcome, Thresholds, Trial,
    TrialPlan, TrialVerdict,
};
