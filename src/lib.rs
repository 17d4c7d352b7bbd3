pub mod ast;
pub mod auth;
pub mod cli;
pub mod coerce;
pub mod compiler;
pub mod document;
pub mod evaluator;
pub mod ir;
pub mod lexer;
pub mod methods;
pub mod mutation;
pub mod output;
pub mod parser;
pub mod record;
pub mod schema;
pub mod services;
pub mod splice;
pub mod types;
pub mod value;

pub use ast::{BinOp, Document, Expr, OperationKind, Token};
pub use auth::{AuthorizationRequirement, ClaimSet, DEFAULT_ROLE_CLAIM_TYPE, authorize};
pub use compiler::{CompileError, CompiledQuery, Compiler, ParameterDef, ParameterKind, Variables, compile};
pub use document::{
    CompiledDocument, DocumentCompiler, ExecutionContext, FieldFailure, FieldOutcome, PendingMutation,
    Request,
};
pub use evaluator::{EvalError, Evaluator, Executor};
pub use ir::{Ir, IrKind, TypedNode};
pub use lexer::{LexError, Lexer, Position};
pub use methods::{Arity, Binding, MethodCall, MethodLibrary, MethodRule};
pub use mutation::{MutationDescriptor, MutationError, MutationInvocation, MutationResult};
pub use output::{to_json, to_json_pretty, to_json_value};
pub use parser::{ParseError, Parser};
pub use record::{RecordType, RecordTypeCache};
pub use schema::{
    ArgumentDefinition, EnumType, FieldArguments, FieldContext, Schema, SchemaBuilder, SchemaField,
    SchemaType, SequenceArguments,
};
pub use services::{ResolvedServices, ServiceKey, ServiceProvider};
pub use types::{IntKind, TypeRef};
pub use value::{EnumValue, Object, Record, Value};
