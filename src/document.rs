//! Query and mutation documents.
//!
//! A document names fields of the schema's query type (or registered
//! mutations) with optional aliases, arguments and nested selections:
//!
//! ```text
//! query Adults($min: Int = 18) {
//!     adults: people(filter: "age >= $min", orderBy: "name") { name ...contact }
//! }
//! fragment contact on Person { email }
//! ```
//!
//! Every top-level query field compiles to its own [`CompiledQuery`]. A
//! field that fails to compile is reported under its path without
//! discarding its siblings. Mutation fields are invoked one after another
//! when the document is executed.

use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::json;

use crate::{
    ast::{ArgValue, Document, Expr, FieldSelection, Operation, OperationKind, Selection},
    auth::{ClaimSet, authorize},
    compiler::{CompileError, CompiledQuery, Compiler, Variables},
    evaluator::{Evaluator, Executor},
    ir::{Ir, TypedNode},
    lexer::Lexer,
    methods::MethodLibrary,
    mutation::MutationResult,
    output::to_json_value,
    parser::Parser,
    record::RecordTypeCache,
    schema::{Schema, bind_arguments, convert_argument},
    services::ServiceProvider,
    types::{IntKind, TypeRef},
    value::{Object, Value},
};

/// Sequence arguments in the order they are applied.
const SEQUENCE_ARGUMENTS: [&str; 5] = ["filter", "orderBy", "orderByDesc", "skip", "take"];

/// Per-request inputs of a document compilation.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub operation_name: Option<String>,
    pub variables: Variables,
    pub claims: ClaimSet,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_claims(mut self, claims: ClaimSet) -> Self {
        self.claims = claims;
        self
    }
}

type ContextFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// What a compiled document runs against: a factory for fresh host
/// contexts, the registered services and the executor.
#[derive(Clone)]
pub struct ExecutionContext {
    context: ContextFactory,
    services: ServiceProvider,
    executor: Arc<dyn Executor>,
}

impl ExecutionContext {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ExecutionContext {
            context: Arc::new(factory),
            services: ServiceProvider::default(),
            executor: Arc::new(Evaluator::new()),
        }
    }

    /// Every request sees a copy of `value`.
    pub fn from_value(value: Value) -> Self {
        Self::new(move || value.clone())
    }

    pub fn with_services(mut self, services: ServiceProvider) -> Self {
        self.services = services;
        self
    }

    pub fn with_executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    fn fresh_context(&self) -> Value {
        (self.context)()
    }
}

/// A compile error located at a field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub error: CompileError,
    pub path: Vec<String>,
}

impl FieldFailure {
    fn at(path: &[String]) -> impl Fn(CompileError) -> FieldFailure + '_ {
        move |error| FieldFailure {
            error,
            path: path.to_vec(),
        }
    }
}

/// A mutation field waiting to be invoked.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub mutation: String,
    pub arguments: Vec<(String, Value)>,
    pub selections: Vec<Selection>,
    pub path: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum FieldOutcome {
    Query(CompiledQuery),
    Mutation(PendingMutation),
    Failed(FieldFailure),
}

/// Result of compiling a document: one outcome per response name, in
/// request order.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub kind: OperationKind,
    pub fields: IndexMap<String, FieldOutcome>,
    claims: ClaimSet,
}

impl CompiledDocument {
    pub fn field(&self, name: &str) -> Option<&FieldOutcome> {
        self.fields.get(name)
    }

    pub fn query(&self, name: &str) -> Option<&CompiledQuery> {
        match self.fields.get(name)? {
            FieldOutcome::Query(query) => Some(query),
            _ => None,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &FieldFailure> {
        self.fields.values().filter_map(|outcome| match outcome {
            FieldOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }
}

/// Compiles and runs documents against one schema.
pub struct DocumentCompiler<'s> {
    schema: &'s Schema,
    methods: &'s MethodLibrary,
    records: &'s RecordTypeCache,
}

impl<'s> DocumentCompiler<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        DocumentCompiler {
            schema,
            methods: MethodLibrary::shared(),
            records: RecordTypeCache::global(),
        }
    }

    pub fn with_methods(mut self, methods: &'s MethodLibrary) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_record_cache(mut self, records: &'s RecordTypeCache) -> Self {
        self.records = records;
        self
    }

    /// Compiles `source` for `request`.
    ///
    /// # Errors
    ///
    /// Parse errors, an unknown operation and invalid variables fail the
    /// whole document. Errors in individual fields, unknown or cyclic
    /// fragments included, are returned as [`FieldOutcome::Failed`].
    pub fn compile(&self, source: &str, request: &Request) -> Result<CompiledDocument, CompileError> {
        let document = Parser::new(Lexer::new(source))?.parse_document()?;
        let operation = select_operation(&document, request.operation_name.as_deref())?;
        let variables = self.bind_variables(operation, &request.variables)?;
        debug!(
            "compiling {:?} operation {} with {} selection(s)",
            operation.kind,
            operation.name.as_deref().unwrap_or("<anonymous>"),
            operation.selections.len()
        );

        let compiler = Compiler::new(self.schema, self.methods, &variables);
        let context = Compiler::context_node(self.schema.context_type());
        let mut fields = IndexMap::new();
        for selection in &operation.selections {
            let expanded = match expand_fragments(
                &document,
                std::slice::from_ref(selection),
                &mut Vec::new(),
            ) {
                Ok(expanded) => expanded,
                Err(error) => {
                    let name = match selection {
                        Selection::Field(field) => field.response_name(),
                        Selection::FragmentSpread { name, .. } => name.as_str(),
                    };
                    warn!("field {} failed to compile: {}", name, error);
                    let path = vec![name.to_string()];
                    fields.insert(name.to_string(), FieldOutcome::Failed(FieldFailure { error, path }));
                    continue;
                }
            };
            for selection in &expanded {
                let Selection::Field(field) = selection else {
                    continue;
                };
                let path = vec![field.response_name().to_string()];
                let outcome = match operation.kind {
                    OperationKind::Query => {
                        match self.compile_field(&compiler, &context, field, &request.claims, &path) {
                            Ok(node) => FieldOutcome::Query(CompiledQuery::from_node(
                                node,
                                self.schema.context_type(),
                            )),
                            Err(failure) => FieldOutcome::Failed(failure),
                        }
                    }
                    OperationKind::Mutation => match self.prepare_mutation(field, &variables, &path) {
                        Ok(pending) => FieldOutcome::Mutation(pending),
                        Err(failure) => FieldOutcome::Failed(failure),
                    },
                };
                if let FieldOutcome::Failed(failure) = &outcome {
                    warn!("field {} failed to compile: {}", path.join("."), failure.error);
                }
                fields.insert(field.response_name().to_string(), outcome);
            }
        }

        Ok(CompiledDocument {
            kind: operation.kind,
            fields,
            claims: request.claims.clone(),
        })
    }

    /// Runs a compiled document and assembles the response envelope.
    ///
    /// Query fields share one host context. Mutations run in document order,
    /// each with a fresh context.
    pub fn execute(&self, document: &CompiledDocument, exec: &ExecutionContext) -> serde_json::Value {
        let context = match document.kind {
            OperationKind::Query => exec.fresh_context(),
            OperationKind::Mutation => Value::Null,
        };
        let mut data = serde_json::Map::new();
        let mut errors = Vec::new();
        for (name, outcome) in &document.fields {
            let result = match outcome {
                FieldOutcome::Query(query) => exec
                    .executor
                    .execute(query, context.clone(), &exec.services)
                    .map(|value| to_json_value(&value, Some(self.schema)))
                    .map_err(|e| (e.to_string(), vec![name.clone()])),
                FieldOutcome::Mutation(pending) => self.run_mutation(pending, &document.claims, exec),
                FieldOutcome::Failed(failure) => Err((failure.error.to_string(), failure.path.clone())),
            };
            match result {
                Ok(value) => {
                    data.insert(name.clone(), value);
                }
                Err((message, path)) => {
                    data.insert(name.clone(), serde_json::Value::Null);
                    errors.push(json!({ "message": message, "path": path }));
                }
            }
        }

        let mut envelope = serde_json::Map::new();
        envelope.insert("data".to_string(), serde_json::Value::Object(data));
        if !errors.is_empty() {
            envelope.insert("errors".to_string(), serde_json::Value::Array(errors));
        }
        serde_json::Value::Object(envelope)
    }

    /// Compiles and executes in one step. Document-level compile errors are
    /// reported in the envelope with `data: null`.
    pub fn run(&self, source: &str, request: &Request, exec: &ExecutionContext) -> serde_json::Value {
        match self.compile(source, request) {
            Ok(document) => self.execute(&document, exec),
            Err(e) => json!({ "data": null, "errors": [{ "message": e.to_string() }] }),
        }
    }

    fn bind_variables(&self, operation: &Operation, supplied: &Variables) -> Result<Variables, CompileError> {
        let mut variables = Variables::new();
        for def in &operation.variables {
            let target = format!("${}", def.name);
            let ty = self.type_from_name(&def.type_name);
            let value = match supplied.get(&def.name) {
                Some(value) => value.clone(),
                None => match &def.default {
                    Some(default) => argument_value(default, &Variables::new())?,
                    None => Value::Null,
                },
            };
            if value.is_null() && !ty.admits_null() {
                return Err(CompileError::InvalidArgument {
                    target,
                    message: format!("variable of type {} is required", def.type_name),
                });
            }
            let value = convert_argument(&value, &ty, self.schema)
                .map_err(|message| CompileError::InvalidArgument { target, message })?;
            variables.insert(def.name.clone(), value);
        }
        for (name, value) in supplied {
            if !variables.contains_key(name) {
                variables.insert(name.clone(), value.clone());
            }
        }
        Ok(variables)
    }

    /// Type named in a variable definition: `Int!`, `[String]`, `Status`.
    fn type_from_name(&self, name: &str) -> TypeRef {
        let (name, required) = match name.strip_suffix('!') {
            Some(inner) => (inner, true),
            None => (name, false),
        };
        let ty = match name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
            Some(element) => TypeRef::list(self.type_from_name(element)),
            None => match name {
                "Int" => TypeRef::Int(IntKind::I32),
                "Long" => TypeRef::Int(IntKind::I64),
                "Float" => TypeRef::Float,
                "Decimal" => TypeRef::Decimal,
                "String" | "ID" => TypeRef::String,
                "Boolean" => TypeRef::Boolean,
                "Guid" => TypeRef::Guid,
                "Date" | "DateTime" => TypeRef::DateTime,
                other if self.schema.get_enum(other).is_some() => TypeRef::Enum(other.to_string()),
                other if self.schema.get_type(other).is_some() => TypeRef::Object(other.to_string()),
                _ => TypeRef::Any,
            },
        };
        if required { ty } else { TypeRef::nullable(ty) }
    }

    fn compile_field(
        &self,
        compiler: &Compiler<'_>,
        parent: &TypedNode,
        field: &FieldSelection,
        claims: &ClaimSet,
        path: &[String],
    ) -> Result<TypedNode, FieldFailure> {
        let fail = FieldFailure::at(path);
        let node = match parent.ty().underlying() {
            TypeRef::Object(type_name) => {
                let schema_field = self
                    .schema
                    .get_type(type_name)
                    .and_then(|t| t.get_field(&field.name))
                    .ok_or_else(|| fail(CompileError::unknown_field(&field.name, parent.ty())))?;
                authorize(
                    &format!("{}.{}", type_name, field.name),
                    schema_field.authorization.as_ref(),
                    claims,
                )
                .map_err(&fail)?;

                let mut plain = Vec::new();
                let mut sequence = Vec::new();
                for (name, arg) in &field.arguments {
                    let value = argument_value(arg, compiler.variables()).map_err(&fail)?;
                    let declared = schema_field.arguments.iter().any(|d| d.name == *name);
                    if !declared && schema_field.sequence_arguments.accepts(name) {
                        sequence.push((name.as_str(), value));
                    } else {
                        plain.push((name.clone(), value));
                    }
                }
                let arguments =
                    bind_arguments(&field.name, &schema_field.arguments, &plain, self.schema)
                        .map_err(&fail)?;
                let node = compiler
                    .resolve_schema_field(parent, schema_field, &arguments)
                    .map_err(&fail)?;
                apply_sequence_arguments(compiler, node, &sequence, parent).map_err(&fail)?
            }
            _ => {
                if !field.arguments.is_empty() {
                    return Err(fail(CompileError::InvalidArgument {
                        target: field.name.clone(),
                        message: format!("{} fields take no arguments", parent.ty()),
                    }));
                }
                compiler.resolve_field(parent, &field.name).map_err(&fail)?
            }
        };
        self.authorize_type(node.ty(), claims).map_err(&fail)?;

        if field.selections.is_empty() {
            return Ok(node);
        }
        self.select(compiler, node, &field.selections, claims, path)
    }

    /// Checks the requirement of the object type a field returns.
    fn authorize_type(&self, ty: &TypeRef, claims: &ClaimSet) -> Result<(), CompileError> {
        let ty = ty.underlying();
        let ty = ty.element_type().map(TypeRef::underlying).unwrap_or(ty);
        if let TypeRef::Object(name) = ty
            && let Some(schema_type) = self.schema.get_type(name)
        {
            authorize(name, schema_type.authorization.as_ref(), claims)?;
        }
        Ok(())
    }

    /// Applies a selection set: each element of a sequence, or a single
    /// object, is projected into a synthesized record.
    fn select(
        &self,
        compiler: &Compiler<'_>,
        mut node: TypedNode,
        selections: &[Selection],
        claims: &ClaimSet,
        path: &[String],
    ) -> Result<TypedNode, FieldFailure> {
        let ty = node.ty().clone();
        let (element, over_sequence) = match ty.element_type() {
            Some(element) => (element.clone(), true),
            None => match ty.underlying() {
                inner @ (TypeRef::Object(_) | TypeRef::Record(_) | TypeRef::Any) => (inner.clone(), false),
                other => {
                    return Err(FieldFailure::at(path)(CompileError::UnsupportedType {
                        ty: other.to_string(),
                        context: "with a selection set".to_string(),
                    }));
                }
            },
        };

        let param = compiler.fresh_parameter(element);
        let param_name = param.expr.parameter_name().unwrap_or_default().to_string();
        let record = self.build_record(compiler, &param, selections, claims, path)?;
        let body = node.absorb(record);
        let source = std::mem::replace(&mut node.expr, Ir::hole());
        node.expr = if over_sequence {
            Ir::project(source, param_name, body)
        } else {
            Ir::with(source, param_name, body)
        };
        Ok(node)
    }

    fn build_record(
        &self,
        compiler: &Compiler<'_>,
        param: &TypedNode,
        selections: &[Selection],
        claims: &ClaimSet,
        path: &[String],
    ) -> Result<TypedNode, FieldFailure> {
        let mut node = param.with_expr(Ir::hole());
        // A repeated response name keeps its first position and last value
        let mut columns: IndexMap<String, Ir> = IndexMap::new();
        for selection in selections {
            let Selection::Field(field) = selection else {
                continue;
            };
            let mut child_path = path.to_vec();
            child_path.push(field.response_name().to_string());
            let child = self.compile_field(compiler, param, field, claims, &child_path)?;
            let expr = node.absorb(child);
            columns.insert(field.response_name().to_string(), expr);
        }

        let record = self.records.get_or_create(
            columns
                .iter()
                .map(|(name, expr)| (name.clone(), expr.ty.clone())),
        );
        node.expr = Ir::new_record(record, columns.into_values().collect());
        Ok(node)
    }

    fn prepare_mutation(
        &self,
        field: &FieldSelection,
        variables: &Variables,
        path: &[String],
    ) -> Result<PendingMutation, FieldFailure> {
        let fail = FieldFailure::at(path);
        let descriptor = self.schema.mutation(&field.name).ok_or_else(|| {
            fail(CompileError::UnknownField {
                field: field.name.clone(),
                context_type: "Mutation".to_string(),
            })
        })?;
        let mut arguments = Vec::with_capacity(field.arguments.len());
        for (name, arg) in &field.arguments {
            arguments.push((name.clone(), argument_value(arg, variables).map_err(&fail)?));
        }
        Ok(PendingMutation {
            mutation: descriptor.name().to_string(),
            arguments,
            selections: field.selections.clone(),
            path: path.to_vec(),
        })
    }

    fn run_mutation(
        &self,
        pending: &PendingMutation,
        claims: &ClaimSet,
        exec: &ExecutionContext,
    ) -> Result<serde_json::Value, (String, Vec<String>)> {
        let failed = |message: String| (message, pending.path.clone());
        let descriptor = self
            .schema
            .mutation(&pending.mutation)
            .ok_or_else(|| failed(format!("Mutation '{}' is not registered", pending.mutation)))?;

        let result = descriptor
            .invoke(
                exec.fresh_context(),
                &pending.arguments,
                &exec.services,
                claims,
                self.schema,
            )
            .map_err(|e| failed(e.to_string()))?;

        let located = |failure: FieldFailure| (failure.error.to_string(), failure.path);
        let (query, context) = match result {
            MutationResult::Value { value, ty } => {
                let no_variables = Variables::new();
                let compiler = Compiler::new(self.schema, self.methods, &no_variables);
                let node = Compiler::context_node(ty.clone());
                let node = self
                    .shape(&compiler, node, &pending.selections, claims, &pending.path)
                    .map_err(located)?;
                (CompiledQuery::from_node(node, ty), value)
            }
            MutationResult::Requery {
                expression,
                variables,
            } => {
                debug!("re-querying mutation '{}' result: {}", pending.mutation, expression);
                let compiler = Compiler::new(self.schema, self.methods, &variables);
                let context_type = descriptor.context_type().clone();
                let node = compiler
                    .compile_source(&expression, &Compiler::context_node(context_type.clone()))
                    .map_err(|e| failed(e.to_string()))?;
                let node = self
                    .shape(&compiler, node, &pending.selections, claims, &pending.path)
                    .map_err(located)?;
                (CompiledQuery::from_node(node, context_type), exec.fresh_context())
            }
        };

        exec.executor
            .execute(&query, context, &exec.services)
            .map(|value| to_json_value(&value, Some(self.schema)))
            .map_err(|e| failed(e.to_string()))
    }

    fn shape(
        &self,
        compiler: &Compiler<'_>,
        node: TypedNode,
        selections: &[Selection],
        claims: &ClaimSet,
        path: &[String],
    ) -> Result<TypedNode, FieldFailure> {
        if selections.is_empty() {
            return Ok(node);
        }
        self.authorize_type(node.ty(), claims)
            .map_err(FieldFailure::at(path))?;
        self.select(compiler, node, selections, claims, path)
    }
}

fn select_operation<'d>(document: &'d Document, name: Option<&str>) -> Result<&'d Operation, CompileError> {
    match name {
        Some(name) => document
            .operations
            .iter()
            .find(|op| op.name.as_deref() == Some(name))
            .ok_or_else(|| CompileError::UnknownOperation(name.to_string())),
        None => document
            .operations
            .first()
            .ok_or_else(|| CompileError::UnknownOperation("<anonymous>".to_string())),
    }
}

/// Replaces fragment spreads with the fields they stand for, at every
/// nesting level.
fn expand_fragments(
    document: &Document,
    selections: &[Selection],
    active: &mut Vec<String>,
) -> Result<Vec<Selection>, CompileError> {
    let mut expanded = Vec::with_capacity(selections.len());
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let mut field = field.clone();
                field.selections = expand_fragments(document, &field.selections, active)?;
                expanded.push(Selection::Field(field));
            }
            Selection::FragmentSpread { name, .. } => {
                if active.contains(name) {
                    return Err(CompileError::FragmentCycle(name.clone()));
                }
                let fragment = document
                    .fragment(name)
                    .ok_or_else(|| CompileError::UnknownFragment(name.clone()))?;
                active.push(name.clone());
                let fields = expand_fragments(document, &fragment.selections, active);
                active.pop();
                expanded.extend(fields?);
            }
        }
    }
    Ok(expanded)
}

/// Sequence arguments become method calls: `filter` is `where`, sort keys
/// and page sizes keep their names.
fn apply_sequence_arguments(
    compiler: &Compiler<'_>,
    mut node: TypedNode,
    arguments: &[(&str, Value)],
    caller: &TypedNode,
) -> Result<TypedNode, CompileError> {
    for name in SEQUENCE_ARGUMENTS {
        let Some((_, value)) = arguments.iter().rev().find(|(n, _)| *n == name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let invalid = |message: &str| CompileError::InvalidArgument {
            target: name.to_string(),
            message: message.to_string(),
        };
        let (method, expr) = match name {
            "skip" | "take" => {
                let count = value
                    .as_i128()
                    .and_then(|n| i64::try_from(n).ok())
                    .ok_or_else(|| invalid("expected an integer"))?;
                (name, Expr::Integer(count))
            }
            _ => {
                let source = value
                    .as_str()
                    .ok_or_else(|| invalid("expected an expression string"))?;
                let expr = Parser::new(Lexer::new(source))?.parse()?;
                (if name == "filter" { "where" } else { name }, expr)
            }
        };
        node = compiler.call_method(node, method, std::slice::from_ref(&expr), caller)?;
    }
    Ok(node)
}

/// Value of a document argument, with `$variables` substituted.
fn argument_value(arg: &ArgValue, variables: &Variables) -> Result<Value, CompileError> {
    Ok(match arg {
        ArgValue::Int(n) => Value::Integer(*n),
        ArgValue::Float(d) => Value::Decimal(*d),
        ArgValue::String(s) => Value::String(s.clone()),
        ArgValue::Boolean(b) => Value::Boolean(*b),
        ArgValue::Null => Value::Null,
        ArgValue::Enum(name) => Value::String(name.clone()),
        ArgValue::Variable(name) => variables
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownVariable(name.clone()))?,
        ArgValue::List(items) => Value::List(
            items
                .iter()
                .map(|item| argument_value(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        ArgValue::Object(fields) => {
            let mut object = Object::new("Input");
            for (name, value) in fields {
                object.fields.insert(name.clone(), argument_value(value, variables)?);
            }
            Value::Object(object)
        }
    })
}
