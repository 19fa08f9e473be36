//! Transaction autopsy engine.
//!
//! Takes an exploit transaction's execution trace plus static-analysis
//! findings and works out who attacked whom and how:
//!
//! 1. [`call_tree`] parses geth `callTracer` frames or parity flat traces.
//! 2. [`value_flow`] turns effective value-bearing calls and token `Transfer`
//!    logs into a multigraph, while [`correlator`] ties findings to calls.
//! 3. [`roles`] assigns every address a role through an ordered rule list.
//! 4. [`patterns`] fires independent exploit matchers and ranks the
//!    resulting hypotheses by confidence.
//!
//! [`pipeline::Analyzer`] runs the stages for one trace and [`batch`] runs many
//! traces on a bounded worker pool.

pub mod batch;
pub mod call_tree;
pub mod config;
pub mod correlator;
pub mod error;
pub mod findings;
pub mod paths;
pub mod patterns;
pub mod pipeline;
pub mod report;
pub mod roles;
pub mod selectors;
pub mod types;
pub mod value_flow;

pub use config::AutopsyConfig;
pub use error::AutopsyError;
pub use pipeline::{AnalysisContext, Analyzer};
pub use report::{AnalysisResult, AnalysisStatus};

#[cfg(test)]
mod tests;
