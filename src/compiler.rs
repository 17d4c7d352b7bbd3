//! EQL expression compiler.
//!
//! Walks a parsed [`Expr`] against a context type and produces a typed
//! [`Ir`] tree. Identifiers resolve through the schema, `$variables` become
//! captured constants and method calls dispatch through the
//! [`MethodLibrary`].
//!
//! # Example
//!
//! ```
//! use eql_lang::{compile, TypeRef, Value, Variables};
//!
//! let query = compile("1 + 2 * 3", TypeRef::Any, None, None, &Variables::new()).unwrap();
//! assert_eq!(query.execute(Value::Null).unwrap(), Value::Integer(7));
//! ```

use std::{borrow::Cow, cell::Cell, rc::Rc};

use indexmap::IndexMap;
use log::debug;
use thiserror::Error;

use crate::{
    ast::Expr,
    coerce,
    evaluator::{EvalError, Evaluator, Executor},
    ir::{Ir, TypedNode},
    lexer::Lexer,
    methods::{Arity, Binding, MethodCall, MethodLibrary},
    parser::{ParseError, Parser},
    schema::{FieldContext, Schema, SchemaField, bind_arguments},
    services::{ServiceKey, ServiceProvider},
    splice,
    types::{IntKind, TypeRef},
    value::Value,
};

/// Name of the parameter bound to the host context.
pub const CONTEXT_PARAMETER: &str = "ctx";

/// Request variables, referenced in expressions as `$name`.
pub type Variables = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Field '{field}' not found on type {context_type}")]
    UnknownField { field: String, context_type: String },

    #[error("Method '{method}' not found on type {context_type}")]
    UnknownMethod {
        method: String,
        context_type: String,
    },

    #[error("Variable '${0}' is not defined")]
    UnknownVariable(String),

    #[error("Fragment '{0}' is not defined")]
    UnknownFragment(String),

    #[error("Fragment '{0}' spreads itself")]
    FragmentCycle(String),

    #[error("Operation '{0}' not found in document")]
    UnknownOperation(String),

    #[error("Method '{method}' expects {expected} argument(s) but got {actual}")]
    Arity {
        method: String,
        expected: Arity,
        actual: usize,
    },

    #[error("Operator '{op}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: TypeRef,
        right: TypeRef,
    },

    #[error("Conditional test '{test}' must be Boolean but is {actual}")]
    ConditionType { test: String, actual: TypeRef },

    #[error("Predicate of '{method}' must be Boolean but is {actual}")]
    PredicateType { method: String, actual: TypeRef },

    #[error("Method '{method}' needs a sequence but {context_type} contains none")]
    NoSequenceContext {
        method: String,
        context_type: TypeRef,
    },

    #[error("Type {ty} is not supported {context}")]
    UnsupportedType { ty: String, context: String },

    #[error("Invalid argument for '{target}': {message}")]
    InvalidArgument { target: String, message: String },

    #[error("Service {0} is not registered")]
    MissingService(String),

    #[error("Not authorized to access '{target}'")]
    Authorization {
        target: String,
        unmet: Vec<Vec<String>>,
    },
}

impl CompileError {
    pub(crate) fn unknown_field(field: &str, context_type: &TypeRef) -> Self {
        CompileError::UnknownField {
            field: field.to_string(),
            context_type: context_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Context,
    Constant,
    Service(ServiceKey),
}

/// One parameter of a compiled query, in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub ty: TypeRef,
    pub kind: ParameterKind,
}

/// A compiled expression ready to run.
///
/// Parameters are the context first, then one per captured constant (whose
/// values are held in `arguments`), then one per required service.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub body: Ir,
    pub parameters: Vec<ParameterDef>,
    pub arguments: Vec<Value>,
}

impl CompiledQuery {
    pub fn from_node(node: TypedNode, context_type: TypeRef) -> Self {
        let mut parameters = vec![ParameterDef {
            name: CONTEXT_PARAMETER.to_string(),
            ty: context_type,
            kind: ParameterKind::Context,
        }];
        let mut arguments = Vec::with_capacity(node.constants.len());
        for (name, value) in node.constants {
            parameters.push(ParameterDef {
                name: constant_parameter(&name),
                ty: value.static_type(),
                kind: ParameterKind::Constant,
            });
            arguments.push(value);
        }
        for key in node.services {
            parameters.push(ParameterDef {
                name: key.name().to_string(),
                ty: TypeRef::Any,
                kind: ParameterKind::Service(key),
            });
        }
        CompiledQuery {
            body: node.expr,
            parameters,
            arguments,
        }
    }

    pub fn result_type(&self) -> &TypeRef {
        &self.body.ty
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceKey> {
        self.parameters.iter().filter_map(|p| match &p.kind {
            ParameterKind::Service(key) => Some(key),
            _ => None,
        })
    }

    pub fn execute(&self, context: Value) -> Result<Value, EvalError> {
        self.execute_with(context, &ServiceProvider::default())
    }

    pub fn execute_with(&self, context: Value, services: &ServiceProvider) -> Result<Value, EvalError> {
        Evaluator::new().execute(self, context, services)
    }
}

/// Parameter name a `$variable` is bound to.
pub(crate) fn constant_parameter(variable: &str) -> String {
    format!("${}", variable)
}

/// Compiles `source` against `context_type`.
///
/// Without a schema only dynamic (`Any`) contexts and records can be
/// navigated; without a method library the standard one is used.
pub fn compile(
    source: &str,
    context_type: TypeRef,
    schema: Option<&Schema>,
    methods: Option<&MethodLibrary>,
    variables: &Variables,
) -> Result<CompiledQuery, CompileError> {
    let fallback;
    let schema = match schema {
        Some(schema) => schema,
        None => {
            fallback = Schema::default();
            &fallback
        }
    };
    let methods = methods.unwrap_or_else(|| MethodLibrary::shared());
    debug!("compiling `{}` against {}", source, context_type);

    let compiler = Compiler::new(schema, methods, variables);
    let context = Compiler::context_node(context_type.clone());
    let node = compiler.compile_source(source, &context)?;
    debug!("compiled `{}` to {}", source, node.ty());
    Ok(CompiledQuery::from_node(node, context_type))
}

pub struct Compiler<'a> {
    schema: &'a Schema,
    methods: &'a MethodLibrary,
    variables: Cow<'a, Variables>,
    next_param: Rc<Cell<usize>>,
}

impl<'a> Compiler<'a> {
    pub fn new(schema: &'a Schema, methods: &'a MethodLibrary, variables: &'a Variables) -> Self {
        Compiler {
            schema,
            methods,
            variables: Cow::Borrowed(variables),
            next_param: Rc::new(Cell::new(0)),
        }
    }

    /// Compiler seeing `extra` as additional variables. Lambda parameter
    /// names stay unique across both compilers.
    pub fn with_variables<I>(&self, extra: I) -> Compiler<'a>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut variables = self.variables.clone().into_owned();
        variables.extend(extra);
        Compiler {
            schema: self.schema,
            methods: self.methods,
            variables: Cow::Owned(variables),
            next_param: Rc::clone(&self.next_param),
        }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn methods(&self) -> &'a MethodLibrary {
        self.methods
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Node for the host context parameter.
    pub fn context_node(ty: TypeRef) -> TypedNode {
        TypedNode::new(Ir::parameter(CONTEXT_PARAMETER, ty))
    }

    /// Fresh lambda parameter of type `ty`.
    pub fn fresh_parameter(&self, ty: TypeRef) -> TypedNode {
        let n = self.next_param.get();
        self.next_param.set(n + 1);
        TypedNode::new(Ir::parameter(format!("p{}", n), ty))
    }

    pub fn compile_source(&self, source: &str, context: &TypedNode) -> Result<TypedNode, CompileError> {
        let mut parser = Parser::new(Lexer::new(source))?;
        let expr = parser.parse()?;
        self.compile_expr(&expr, context)
    }

    pub fn compile_expr(&self, expr: &Expr, context: &TypedNode) -> Result<TypedNode, CompileError> {
        match expr {
            Expr::Integer(n) => {
                let kind = if i32::try_from(*n).is_ok() {
                    IntKind::I32
                } else {
                    IntKind::I64
                };
                Ok(TypedNode::new(Ir::typed_constant(
                    Value::Integer(*n),
                    TypeRef::Int(kind),
                )))
            }
            Expr::Decimal(d) => Ok(TypedNode::new(Ir::constant(Value::Decimal(*d)))),
            Expr::String(s) => Ok(TypedNode::new(Ir::constant(Value::String(s.clone())))),
            Expr::Boolean(b) => Ok(TypedNode::new(Ir::constant(Value::Boolean(*b)))),
            Expr::Null => Ok(TypedNode::new(Ir::constant(Value::Null))),
            Expr::Variable(name) => self.compile_variable(name),
            Expr::Identifier(name) => self.resolve_field(context, name),
            Expr::Access { object, name } => {
                let object = self.compile_expr(object, context)?;
                self.resolve_field(&object, name)
            }
            Expr::Call {
                object,
                method,
                args,
            } => {
                let receiver = match object {
                    Some(object) => self.compile_expr(object, context)?,
                    None => context.clone(),
                };
                self.call_method(receiver, method, args, context)
            }
            Expr::BinaryOp { op, left, right } => {
                let mut node = self.compile_expr(left, context)?;
                let right = self.compile_expr(right, context)?;
                let right = node.absorb(right);
                let left = std::mem::replace(&mut node.expr, Ir::hole());
                node.expr = coerce::reconcile(*op, left, right, self.schema)?;
                Ok(node)
            }
            Expr::Conditional {
                test,
                test_text,
                then,
                otherwise,
            } => {
                let mut node = self.compile_expr(test, context)?;
                let test_ty = node.ty().clone();
                let test = std::mem::replace(&mut node.expr, Ir::hole());
                let test = coerce::as_predicate(test).ok_or_else(|| CompileError::ConditionType {
                    test: test_text.clone(),
                    actual: test_ty,
                })?;
                let then = self.compile_expr(then, context)?;
                let then = node.absorb(then);
                let otherwise = self.compile_expr(otherwise, context)?;
                let otherwise = node.absorb(otherwise);
                let (then, otherwise, ty) = coerce::unify_branches(then, otherwise)?;
                node.expr = Ir::conditional(test, then, otherwise, ty);
                Ok(node)
            }
        }
    }

    fn compile_variable(&self, name: &str) -> Result<TypedNode, CompileError> {
        let value = self
            .variables
            .get(name)
            .ok_or_else(|| CompileError::UnknownVariable(name.to_string()))?;
        let param = Ir::parameter(constant_parameter(name), value.static_type());
        Ok(TypedNode::new(param).with_constant(name, value.clone()))
    }

    /// Resolves field `name` on the value of `context`.
    pub fn resolve_field(&self, context: &TypedNode, name: &str) -> Result<TypedNode, CompileError> {
        match context.ty().underlying() {
            TypeRef::Object(type_name) => {
                let field = self
                    .schema
                    .get_type(type_name)
                    .and_then(|t| t.get_field(name))
                    .ok_or_else(|| CompileError::unknown_field(name, context.ty()))?;
                let arguments = bind_arguments(name, &field.arguments, &[], self.schema)?;
                self.resolve_schema_field(context, field, &arguments)
            }
            TypeRef::Record(record) => match record.field_type(name) {
                Some(ty) => Ok(context.with_expr(Ir::member(
                    context.expr.clone(),
                    name,
                    ty.clone(),
                ))),
                None => Err(CompileError::unknown_field(name, context.ty())),
            },
            TypeRef::Any => Ok(context.with_expr(Ir::member(
                context.expr.clone(),
                name,
                TypeRef::Any,
            ))),
            other => Err(CompileError::unknown_field(name, other)),
        }
    }

    /// Runs a schema field's resolver with already-bound arguments.
    pub fn resolve_schema_field(
        &self,
        context: &TypedNode,
        field: &SchemaField,
        arguments: &crate::schema::FieldArguments,
    ) -> Result<TypedNode, CompileError> {
        debug!("resolving field '{}' on {}", field.name, context.ty());
        field.resolve(&FieldContext::new(self, context, arguments))
    }

    /// Applies method `method` to `receiver`. Arguments compile against the
    /// element type for element-bound methods and against `caller`
    /// otherwise. Sequence methods on a non-sequence receiver are spliced
    /// below the receiver's member-access chain.
    pub fn call_method(
        &self,
        receiver: TypedNode,
        method: &str,
        args: &[Expr],
        caller: &TypedNode,
    ) -> Result<TypedNode, CompileError> {
        let rule = self
            .methods
            .get(method)
            .ok_or_else(|| CompileError::UnknownMethod {
                method: method.to_string(),
                context_type: receiver.ty().to_string(),
            })?;
        rule.arity().check(rule.name(), args.len())?;

        if rule.requires_sequence() && !receiver.ty().is_sequence() {
            return splice::splice(receiver, rule.name(), |sequence| {
                self.apply_method(rule, sequence, args, caller)
            });
        }
        self.apply_method(rule, receiver, args, caller)
    }

    fn apply_method(
        &self,
        rule: &crate::methods::MethodRule,
        receiver: TypedNode,
        args: &[Expr],
        caller: &TypedNode,
    ) -> Result<TypedNode, CompileError> {
        let inner = match rule.binding() {
            Binding::Element => {
                let element = receiver.ty().element_type().cloned().ok_or_else(|| {
                    CompileError::NoSequenceContext {
                        method: rule.name().to_string(),
                        context_type: receiver.ty().clone(),
                    }
                })?;
                self.fresh_parameter(element)
            }
            Binding::Caller => caller.clone(),
        };
        rule.apply(&MethodCall {
            compiler: self,
            name: rule.name(),
            receiver: &receiver,
            inner: &inner,
            args,
        })
    }
}
