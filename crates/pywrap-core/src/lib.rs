//! pywrap core library: static analysis of Python projects into a
//! UI-ready action specification, and supervised out-of-process execution
//! of the analyzed actions.
//!
//! The analyzer never imports user code unless enriched mode is requested.
//! Execution always happens in a child interpreter that reports back through
//! a single structured envelope. Built with the `python` feature, the crate
//! is also a Python extension module (`_pywrap_core`).

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod models;
pub mod overrides;
pub mod planner;
pub mod runtime;

#[cfg(feature = "python")]
mod python;

pub use analyzer::analyze_path;
pub use config::{AnalysisMode, AnalyzerConfig, ExecutionConfig};
pub use errors::{PywrapError, PywrapResult};
pub use models::AnalysisResult;
pub use overrides::merge_overrides;
pub use planner::prepare_launch;
pub use runtime::{collect_inputs, ActionRunner};
