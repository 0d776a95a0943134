//! Fleet-wide repository automation engine.
//!
//! Given a declarative workflow directory and a target selector, the
//! orchestrator discovers matching projects in the Imbi registry,
//! materializes an isolated workspace per project, clones the
//! repository, evaluates conditions, runs the typed action pipeline,
//! commits with a fixed trailer, and pushes the result or opens a pull
//! request with an LLM-generated summary.

pub mod actions;
pub mod claude;
pub mod cli;
pub mod clients;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod git;
pub mod models;
pub mod process;
pub mod registry;
pub mod template;
pub mod utils;
pub mod workflow_filter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::Configuration;
pub use controller::{Automation, RunOptions, RunSummary, Target};
pub use engine::{RunOutcome, WorkflowEngine};
pub use errors::{Error, Result};
pub use models::{Workflow, WorkflowContext};
