//! # EQL - Parse Trees
//!
//! This module defines the parse trees for the two grammars the crate
//! compiles: the EQL expression language and the field-selection query
//! document language that embeds it.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens produced by the lexer (shared by both grammars)
//! - **[expressions]** - Expression nodes (literals, paths, calls, operators, conditionals)
//! - **[operators]** - Binary operators and their classification
//! - **[document]** - Query documents (operations, selections, fragments, argument values)
//!
//! ## Quick Start
//!
//! ```text
//! people.where(age > 18 and name.startsWith("A")).orderBy(name).first().name
//! ```
//!
//! ```text
//! query Adults($min: Int = 18) {
//!     adults: people(filter: "age >= $min") { name ...contact }
//! }
//! fragment contact on Person { email }
//! ```
//!
//! ## Core Concepts
//!
//! ### Paths and context
//!
//! A bare identifier is resolved against the *current context*, which starts
//! as the host context and becomes each path segment's result for the rest of
//! that path. Inside sequence methods like `where` the context is the
//! element being tested.
//!
//! ### Operator precedence
//!
//! From loosest to tightest: ternary, `or`, `and`, equality, relational,
//! additive, multiplicative, power, unary, postfix (member access and calls).
pub mod document;
pub mod expressions;
pub mod operators;
pub mod tokens;

pub use document::{
    ArgValue, Document, FieldSelection, Fragment, Operation, OperationKind, Selection,
    VariableDefinition,
};
pub use expressions::Expr;
pub use operators::BinOp;
pub use tokens::Token;
