//! Exam-result aggregation and admission-cutoff estimation.
//!
//! Flat per-exam records are folded into students, universities and regions,
//! then projected to the national population and run through a seat-assignment
//! simulation to estimate minimum admission averages.

pub mod aggregate;
pub mod coverage;
pub mod dedup;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod projection;
pub mod ranking;
pub mod report;
pub mod resolver;
pub mod simulation;
pub mod source;

pub use error::{AnalyzerError, Result};
pub use pipeline::{PipelineOptions, Snapshot};
pub use resolver::UniversityResolver;
