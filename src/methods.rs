//! Method library: the named operations callable with `receiver.method(...)`.
//!
//! Each [`MethodRule`] declares its arity, whether it needs a sequence
//! receiver and what its arguments compile against. Sequence methods bind
//! their arguments to a fresh element parameter (`where(age > 3)` compiles
//! `age` against the element type); the others compile arguments in the
//! caller's context.
//!
//! Names are matched case-insensitively and stored lowercased.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use log::debug;
use once_cell::sync::Lazy;

use crate::{
    ast::Expr,
    coerce,
    compiler::{CompileError, Compiler},
    ir::{Ir, Reduction, StringTest, TypedNode},
    types::{IntKind, TypeRef},
    value::Value,
};

/// Number of arguments a method accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive range; `usize::MAX` as the upper bound means unbounded
    Range(usize, usize),
}

impl Arity {
    pub fn min(&self) -> usize {
        match self {
            Arity::Exact(n) => *n,
            Arity::Range(min, _) => *min,
        }
    }

    pub fn max(&self) -> usize {
        match self {
            Arity::Exact(n) => *n,
            Arity::Range(_, max) => *max,
        }
    }

    pub fn check(&self, method: &str, actual: usize) -> Result<(), CompileError> {
        if actual < self.min() || actual > self.max() {
            return Err(CompileError::Arity {
                method: method.to_string(),
                expected: *self,
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(min, usize::MAX) => write!(f, "at least {}", min),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

/// What a method's arguments compile against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The context the call appears in
    Caller,
    /// A fresh parameter of the receiver's element type
    Element,
}

/// Everything a rule needs to build its node.
pub struct MethodCall<'a, 's> {
    pub compiler: &'a Compiler<'s>,
    pub name: &'a str,
    /// The value the method applies to
    pub receiver: &'a TypedNode,
    /// Context the arguments compile against
    pub inner: &'a TypedNode,
    pub args: &'a [Expr],
}

impl MethodCall<'_, '_> {
    pub fn compile_arg(&self, index: usize) -> Result<TypedNode, CompileError> {
        let expr = self.args.get(index).ok_or_else(|| CompileError::Arity {
            method: self.name.to_string(),
            expected: Arity::Exact(index + 1),
            actual: self.args.len(),
        })?;
        self.compiler.compile_expr(expr, self.inner)
    }

    /// Name of the element parameter arguments were bound to.
    fn element_param(&self) -> String {
        self.inner
            .expr
            .parameter_name()
            .unwrap_or_default()
            .to_string()
    }
}

pub type MethodFn =
    Arc<dyn Fn(&MethodCall<'_, '_>) -> Result<TypedNode, CompileError> + Send + Sync>;

#[derive(Clone)]
pub struct MethodRule {
    name: String,
    arity: Arity,
    binding: Binding,
    requires_sequence: bool,
    rule: MethodFn,
}

impl MethodRule {
    pub fn new<F>(name: &str, arity: Arity, binding: Binding, rule: F) -> Self
    where
        F: Fn(&MethodCall<'_, '_>) -> Result<TypedNode, CompileError> + Send + Sync + 'static,
    {
        MethodRule {
            name: name.to_string(),
            arity,
            binding,
            requires_sequence: binding == Binding::Element,
            rule: Arc::new(rule),
        }
    }

    /// Marks a caller-bound method as still needing a sequence receiver.
    pub fn on_sequence(mut self) -> Self {
        self.requires_sequence = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn requires_sequence(&self) -> bool {
        self.requires_sequence
    }

    pub fn apply(&self, call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
        (self.rule)(call)
    }
}

impl fmt::Debug for MethodRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRule")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("binding", &self.binding)
            .field("requires_sequence", &self.requires_sequence)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MethodLibrary {
    rules: IndexMap<String, MethodRule>,
}

static STANDARD: Lazy<MethodLibrary> = Lazy::new(MethodLibrary::standard);

impl MethodLibrary {
    /// Library with no methods.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shared instance of the standard library.
    pub fn shared() -> &'static MethodLibrary {
        &STANDARD
    }

    pub fn standard() -> Self {
        let mut library = MethodLibrary::empty();
        for name in ["where", "filter"] {
            library.register(MethodRule::new(name, Arity::Exact(1), Binding::Element, filter));
        }
        library.register(MethodRule::new("first", Arity::Range(0, 1), Binding::Element, |call| {
            reduce(call, Reduction::First)
        }));
        library.register(MethodRule::new("last", Arity::Range(0, 1), Binding::Element, |call| {
            reduce(call, Reduction::Last)
        }));
        library.register(MethodRule::new("count", Arity::Range(0, 1), Binding::Element, |call| {
            reduce(call, Reduction::Count)
        }));
        library.register(MethodRule::new("distinct", Arity::Range(0, 1), Binding::Element, distinct));
        library.register(
            MethodRule::new("take", Arity::Exact(1), Binding::Caller, |call| page(call, false))
                .on_sequence(),
        );
        library.register(
            MethodRule::new("skip", Arity::Exact(1), Binding::Caller, |call| page(call, true))
                .on_sequence(),
        );
        library.register(MethodRule::new("orderBy", Arity::Exact(1), Binding::Element, |call| {
            order_by(call, false)
        }));
        library.register(MethodRule::new("orderByDesc", Arity::Exact(1), Binding::Element, |call| {
            order_by(call, true)
        }));
        library.register(MethodRule::new("in", Arity::Range(1, usize::MAX), Binding::Caller, in_set));
        for (name, test) in [
            ("startsWith", StringTest::StartsWith),
            ("endsWith", StringTest::EndsWith),
            ("contains", StringTest::Contains),
            ("notContains", StringTest::NotContains),
        ] {
            library.register(MethodRule::new(name, Arity::Exact(1), Binding::Caller, move |call| {
                string_test(call, test)
            }));
        }
        library.register(MethodRule::new("not", Arity::Exact(1), Binding::Caller, not));
        debug!("standard method library has {} method(s)", library.len());
        library
    }

    /// Adds or replaces a rule.
    pub fn register(&mut self, rule: MethodRule) {
        self.rules.insert(rule.name.to_lowercase(), rule);
    }

    pub fn get(&self, name: &str) -> Option<&MethodRule> {
        self.rules.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.values().map(|r| r.name.as_str())
    }
}

/// Compiles argument `index` as a boolean predicate over the element.
fn predicate(call: &MethodCall<'_, '_>, index: usize) -> Result<TypedNode, CompileError> {
    let mut node = call.compile_arg(index)?;
    let actual = node.ty().clone();
    let expr = std::mem::replace(&mut node.expr, Ir::hole());
    node.expr = coerce::as_predicate(expr).ok_or_else(|| CompileError::PredicateType {
        method: call.name.to_string(),
        actual,
    })?;
    Ok(node)
}

/// The receiver, filtered by the optional predicate argument.
fn filtered_receiver(call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
    let mut node = call.receiver.clone();
    if !call.args.is_empty() {
        let predicate = predicate(call, 0)?;
        let predicate = node.absorb(predicate);
        let param = call.element_param();
        node = node.map(|source| Ir::filter(source, param, predicate));
    }
    Ok(node)
}

fn filter(call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
    filtered_receiver(call)
}

fn reduce(call: &MethodCall<'_, '_>, op: Reduction) -> Result<TypedNode, CompileError> {
    Ok(filtered_receiver(call)?.map(|source| Ir::reduce(source, op)))
}

fn distinct(call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
    Ok(filtered_receiver(call)?.map(Ir::distinct))
}

fn page(call: &MethodCall<'_, '_>, skip: bool) -> Result<TypedNode, CompileError> {
    let count = call.compile_arg(0)?;
    if count.ty().int_kind().is_none() || count.ty().is_nullable() {
        return Err(CompileError::TypeMismatch {
            op: call.name.to_string(),
            left: call.receiver.ty().clone(),
            right: count.ty().clone(),
        });
    }
    let mut node = call.receiver.clone();
    let count = node.absorb(count);
    let count = coerce::convert_operand(count, TypeRef::Int(IntKind::I32));
    Ok(node.map(|source| {
        if skip {
            Ir::skip(source, count)
        } else {
            Ir::take(source, count)
        }
    }))
}

fn order_by(call: &MethodCall<'_, '_>, descending: bool) -> Result<TypedNode, CompileError> {
    let key = call.compile_arg(0)?;
    if !key.ty().is_orderable() {
        return Err(CompileError::UnsupportedType {
            ty: key.ty().to_string(),
            context: format!("as a sort key of '{}'", call.name),
        });
    }
    let mut node = call.receiver.clone();
    let key = node.absorb(key);
    let param = call.element_param();
    Ok(node.map(|source| Ir::order_by(source, param, key, descending)))
}

fn in_set(call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
    let unsupported = |ty: String| CompileError::UnsupportedType {
        ty,
        context: "in the list of 'in'".to_string(),
    };

    let mut set = Vec::with_capacity(call.args.len());
    for arg in call.args {
        match arg {
            Expr::String(s) => set.push(Value::String(s.clone())),
            Expr::Integer(n) => set.push(Value::Integer(*n)),
            Expr::Decimal(_) => return Err(unsupported("Decimal".to_string())),
            Expr::Boolean(_) => return Err(unsupported("Boolean".to_string())),
            Expr::Null => return Err(unsupported("Null".to_string())),
            _ => return Err(unsupported("a non-literal expression".to_string())),
        }
    }
    let strings = set.iter().all(|v| matches!(v, Value::String(_)));
    let integers = set.iter().all(|v| matches!(v, Value::Integer(_)));
    if !strings && !integers {
        return Err(unsupported("a mixed list".to_string()));
    }

    let receiver_ty = call.receiver.ty();
    let matches_receiver = if strings {
        receiver_ty.is_string()
    } else {
        receiver_ty.int_kind().is_some()
    };
    if !matches_receiver && *receiver_ty != TypeRef::Any {
        return Err(CompileError::TypeMismatch {
            op: call.name.to_string(),
            left: receiver_ty.clone(),
            right: if strings {
                TypeRef::String
            } else {
                TypeRef::Int(IntKind::I64)
            },
        });
    }
    Ok(call
        .receiver
        .clone()
        .map(|value| Ir::in_set(value, set)))
}

fn string_test(call: &MethodCall<'_, '_>, test: StringTest) -> Result<TypedNode, CompileError> {
    let argument = call.compile_arg(0)?;
    let receiver_ty = call.receiver.ty();
    let string_like = |ty: &TypeRef| ty.is_string() || *ty == TypeRef::Any;
    if !string_like(receiver_ty) || !string_like(argument.ty()) {
        return Err(CompileError::TypeMismatch {
            op: call.name.to_string(),
            left: receiver_ty.clone(),
            right: argument.ty().clone(),
        });
    }
    let mut node = call.receiver.clone();
    let argument = node.absorb(argument);
    Ok(node.map(|target| Ir::string_test(test, target, argument)))
}

fn not(call: &MethodCall<'_, '_>) -> Result<TypedNode, CompileError> {
    let mut operand = call.compile_arg(0)?;
    let actual = operand.ty().clone();
    let expr = std::mem::replace(&mut operand.expr, Ir::hole());
    let expr = coerce::as_predicate(expr).ok_or_else(|| CompileError::TypeMismatch {
        op: "not".to_string(),
        left: actual,
        right: TypeRef::Boolean,
    })?;
    operand.expr = Ir::not(expr);
    Ok(operand)
}
