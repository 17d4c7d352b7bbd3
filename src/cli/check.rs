//! Compile and run EQL expressions or query documents against JSON input

use super::{CliError, variables_from_json};
use crate::{
    DocumentCompiler, ExecutionContext, Lexer, Parser, Request, Schema, Variables, compile,
    output::to_json_value,
};

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// EQL expression or query document
    pub query: String,
    /// JSON input string
    pub input: Option<String>,
    /// JSON object of variables
    pub vars: Option<String>,
    /// Pretty-print the output
    pub pretty: bool,
    /// Only validate syntax, don't execute
    pub syntax_only: bool,
}

/// Result of a check operation
#[derive(Debug)]
pub enum CheckResult {
    /// Syntax validation passed
    SyntaxValid,
    /// Query executed successfully with JSON output
    Success(serde_json::Value),
}

/// Whether `query` is a query document rather than a bare expression
pub fn is_document(query: &str) -> bool {
    let query = query.trim_start();
    query.starts_with('{')
        || ["query", "mutation", "fragment"].iter().any(|keyword| {
            query
                .strip_prefix(keyword)
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '('))
        })
}

/// Execute an eql check operation
pub fn execute_check(options: &CheckOptions) -> Result<CheckResult, CliError> {
    let query = &options.query;
    let document = is_document(query);

    if options.syntax_only {
        let mut parser = Parser::new(Lexer::new(query))?;
        if document {
            parser.parse_document()?;
        } else {
            parser.parse()?;
        }
        return Ok(CheckResult::SyntaxValid);
    }

    let json_str = options.input.as_ref().ok_or(CliError::NoInput)?;
    let json_value: serde_json::Value = serde_json::from_str(json_str)?;
    let (schema, context) = Schema::infer_from_json(&json_value);
    let variables = match &options.vars {
        Some(vars) => variables_from_json(vars)?,
        None => Variables::new(),
    };

    let output = if document {
        let request = Request::new().with_variables(variables);
        DocumentCompiler::new(&schema).run(query, &request, &ExecutionContext::from_value(context))
    } else {
        let compiled = compile(query, schema.context_type(), Some(&schema), None, &variables)?;
        let result = compiled.execute(context)?;
        to_json_value(&result, Some(&schema))
    };
    Ok(CheckResult::Success(output))
}
