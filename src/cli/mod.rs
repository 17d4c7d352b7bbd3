//! CLI support for eql-lang
//!
//! Provides programmatic access to the `eql` command so other tools can
//! embed it.

mod check;
mod convert;

pub use check::{CheckOptions, CheckResult, execute_check, is_document};
pub use convert::{json_to_value, variables_from_json};

use std::io;

use thiserror::Error;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Parse error: {0}")]
    Parse(#[from] crate::ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] crate::CompileError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] crate::EvalError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No input provided. Use --input or pipe JSON to stdin.")]
    NoInput,

    /// `--vars` was valid JSON but not an object
    #[error("Variables must be a JSON object")]
    InvalidVariables,
}
