//! `${name}` resolution before dispatch, rule-driven extraction and response
//! assertions after it, and sequential step chains tying them together.
mod assertion;
mod chain;
mod engine;
mod extract;
pub mod template;

#[cfg(test)]
mod tests;

pub use assertion::{Assertion, CompareOp, CompiledAssertions};
pub use chain::{
    ChainReport, ChainStep, ChainTaskFactory, FailurePolicy, StepChain, StepDispatcher,
    StepReport, StepStatus, StoreIsolation,
};
pub use engine::{CorrelationEngine, UnresolvedMode};
pub use extract::{CompiledRules, ExtractSource, ExtractionRule, ResponseData};
