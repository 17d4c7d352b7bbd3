//! Typed intermediate representation produced by the compiler.
//!
//! Every [`Ir`] node carries its static [`TypeRef`]. Lambda bodies (filter
//! predicates, projections, sort keys) refer to their element through a
//! named [`IrKind::Parameter`] bound by the enclosing node.

use std::{any::Any, fmt, sync::Arc};

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::BinOp,
    record::RecordType,
    services::ServiceKey,
    types::{IntKind, TypeRef},
    value::Value,
};

/// Host function invoked by an [`IrKind::HostCall`]. Receives the resolved
/// service (when one is declared) and the evaluated arguments.
pub type HostFn =
    Arc<dyn Fn(Option<&(dyn Any + Send + Sync)>, &[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct HostFunction(pub HostFn);

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<host fn>")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringTest {
    StartsWith,
    EndsWith,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    First,
    Last,
    Count,
}

#[derive(Debug, Clone)]
pub struct Ir {
    pub kind: IrKind,
    pub ty: TypeRef,
}

#[derive(Debug, Clone)]
pub enum IrKind {
    Constant(Value),
    Parameter(String),
    /// Member of an object or record; null objects yield null
    Member {
        object: Box<Ir>,
        name: String,
    },
    Binary {
        op: BinOp,
        left: Box<Ir>,
        right: Box<Ir>,
    },
    Not(Box<Ir>),
    Conditional {
        test: Box<Ir>,
        then: Box<Ir>,
        otherwise: Box<Ir>,
    },
    /// Conversion to the node's type
    Convert(Box<Ir>),
    /// Three-way ordinal string comparison yielding -1, 0 or 1
    CompareStrings {
        left: Box<Ir>,
        right: Box<Ir>,
    },
    StringTest {
        test: StringTest,
        target: Box<Ir>,
        argument: Box<Ir>,
    },
    InSet {
        value: Box<Ir>,
        set: Vec<Value>,
    },
    Filter {
        source: Box<Ir>,
        param: String,
        predicate: Box<Ir>,
    },
    Project {
        source: Box<Ir>,
        param: String,
        body: Box<Ir>,
    },
    /// Record built field by field in signature order
    NewRecord {
        record: Arc<RecordType>,
        fields: Vec<Ir>,
    },
    OrderBy {
        source: Box<Ir>,
        param: String,
        key: Box<Ir>,
        descending: bool,
    },
    Take {
        source: Box<Ir>,
        count: Box<Ir>,
    },
    Skip {
        source: Box<Ir>,
        count: Box<Ir>,
    },
    Distinct(Box<Ir>),
    Reduce {
        source: Box<Ir>,
        op: Reduction,
    },
    /// Binds `source` to `param` for `body`; a null source yields null
    With {
        source: Box<Ir>,
        param: String,
        body: Box<Ir>,
    },
    HostCall {
        name: String,
        service: Option<ServiceKey>,
        args: Vec<Ir>,
        func: HostFunction,
    },
}

impl Ir {
    pub fn new(kind: IrKind, ty: TypeRef) -> Self {
        Ir { kind, ty }
    }

    pub fn constant(value: Value) -> Self {
        let ty = value.static_type();
        Ir::new(IrKind::Constant(value), ty)
    }

    pub fn typed_constant(value: Value, ty: TypeRef) -> Self {
        Ir::new(IrKind::Constant(value), ty)
    }

    pub fn parameter(name: impl Into<String>, ty: TypeRef) -> Self {
        Ir::new(IrKind::Parameter(name.into()), ty)
    }

    pub fn member(object: Ir, name: impl Into<String>, ty: TypeRef) -> Self {
        Ir::new(
            IrKind::Member {
                object: Box::new(object),
                name: name.into(),
            },
            ty,
        )
    }

    pub fn binary(op: BinOp, left: Ir, right: Ir, ty: TypeRef) -> Self {
        Ir::new(
            IrKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    pub fn not(operand: Ir) -> Self {
        Ir::new(IrKind::Not(Box::new(operand)), TypeRef::Boolean)
    }

    pub fn conditional(test: Ir, then: Ir, otherwise: Ir, ty: TypeRef) -> Self {
        Ir::new(
            IrKind::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            ty,
        )
    }

    /// Converts `inner` to `ty`; no node is added when the types already match.
    pub fn convert(inner: Ir, ty: TypeRef) -> Self {
        if inner.ty == ty {
            inner
        } else {
            Ir::new(IrKind::Convert(Box::new(inner)), ty)
        }
    }

    pub fn compare_strings(left: Ir, right: Ir) -> Self {
        Ir::new(
            IrKind::CompareStrings {
                left: Box::new(left),
                right: Box::new(right),
            },
            TypeRef::Int(IntKind::I32),
        )
    }

    pub fn string_test(test: StringTest, target: Ir, argument: Ir) -> Self {
        Ir::new(
            IrKind::StringTest {
                test,
                target: Box::new(target),
                argument: Box::new(argument),
            },
            TypeRef::Boolean,
        )
    }

    pub fn in_set(value: Ir, set: Vec<Value>) -> Self {
        Ir::new(
            IrKind::InSet {
                value: Box::new(value),
                set,
            },
            TypeRef::Boolean,
        )
    }

    pub fn filter(source: Ir, param: String, predicate: Ir) -> Self {
        let ty = source.ty.clone();
        Ir::new(
            IrKind::Filter {
                source: Box::new(source),
                param,
                predicate: Box::new(predicate),
            },
            ty,
        )
    }

    pub fn project(source: Ir, param: String, body: Ir) -> Self {
        let ty = TypeRef::list(body.ty.clone());
        Ir::new(
            IrKind::Project {
                source: Box::new(source),
                param,
                body: Box::new(body),
            },
            ty,
        )
    }

    pub fn new_record(record: Arc<RecordType>, fields: Vec<Ir>) -> Self {
        let ty = TypeRef::Record(Arc::clone(&record));
        Ir::new(IrKind::NewRecord { record, fields }, ty)
    }

    pub fn order_by(source: Ir, param: String, key: Ir, descending: bool) -> Self {
        let ty = source.ty.clone();
        Ir::new(
            IrKind::OrderBy {
                source: Box::new(source),
                param,
                key: Box::new(key),
                descending,
            },
            ty,
        )
    }

    pub fn take(source: Ir, count: Ir) -> Self {
        let ty = source.ty.clone();
        Ir::new(
            IrKind::Take {
                source: Box::new(source),
                count: Box::new(count),
            },
            ty,
        )
    }

    pub fn skip(source: Ir, count: Ir) -> Self {
        let ty = source.ty.clone();
        Ir::new(
            IrKind::Skip {
                source: Box::new(source),
                count: Box::new(count),
            },
            ty,
        )
    }

    pub fn distinct(source: Ir) -> Self {
        let ty = source.ty.clone();
        Ir::new(IrKind::Distinct(Box::new(source)), ty)
    }

    pub fn reduce(source: Ir, op: Reduction) -> Self {
        let ty = reduced_type(&source.ty, op);
        Ir::new(
            IrKind::Reduce {
                source: Box::new(source),
                op,
            },
            ty,
        )
    }

    pub fn with(source: Ir, param: String, body: Ir) -> Self {
        let ty = TypeRef::nullable(body.ty.clone());
        Ir::new(
            IrKind::With {
                source: Box::new(source),
                param,
                body: Box::new(body),
            },
            ty,
        )
    }

    pub fn host_call(
        name: impl Into<String>,
        service: Option<ServiceKey>,
        args: Vec<Ir>,
        func: HostFn,
        ty: TypeRef,
    ) -> Self {
        Ir::new(
            IrKind::HostCall {
                name: name.into(),
                service,
                args,
                func: HostFunction(func),
            },
            ty,
        )
    }

    /// Placeholder left behind while a child is detached.
    pub(crate) fn hole() -> Self {
        Ir::typed_constant(Value::Null, TypeRef::Null)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, IrKind::Constant(_))
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            IrKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn parameter_name(&self) -> Option<&str> {
        match &self.kind {
            IrKind::Parameter(name) => Some(name),
            _ => None,
        }
    }

    /// The child a member-access chain continues through: the object of a
    /// member access, the source of a reduction or `With`, the operand of a
    /// conversion or the first argument of a host call.
    pub(crate) fn chain_child_mut(&mut self) -> Option<&mut Ir> {
        match &mut self.kind {
            IrKind::Member { object, .. } => Some(&mut **object),
            IrKind::Reduce { source, .. } | IrKind::With { source, .. } => Some(&mut **source),
            IrKind::Convert(inner) => Some(&mut **inner),
            IrKind::HostCall { args, .. } => args.first_mut(),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Vec<&mut Ir> {
        match &mut self.kind {
            IrKind::Constant(_) | IrKind::Parameter(_) => vec![],
            IrKind::Member { object, .. } => vec![&mut **object],
            IrKind::Binary { left, right, .. } | IrKind::CompareStrings { left, right } => {
                vec![&mut **left, &mut **right]
            }
            IrKind::Not(inner) | IrKind::Convert(inner) | IrKind::Distinct(inner) => {
                vec![&mut **inner]
            }
            IrKind::Conditional {
                test,
                then,
                otherwise,
            } => vec![&mut **test, &mut **then, &mut **otherwise],
            IrKind::StringTest {
                target, argument, ..
            } => vec![&mut **target, &mut **argument],
            IrKind::InSet { value, .. } => vec![&mut **value],
            IrKind::Filter {
                source, predicate, ..
            } => vec![&mut **source, &mut **predicate],
            IrKind::Project { source, body, .. } | IrKind::With { source, body, .. } => {
                vec![&mut **source, &mut **body]
            }
            IrKind::NewRecord { fields, .. } | IrKind::HostCall { args: fields, .. } => {
                fields.iter_mut().collect()
            }
            IrKind::OrderBy { source, key, .. } => vec![&mut **source, &mut **key],
            IrKind::Take { source, count } | IrKind::Skip { source, count } => {
                vec![&mut **source, &mut **count]
            }
            IrKind::Reduce { source, .. } => vec![&mut **source],
        }
    }

    /// Recomputes this node's type from its children after one of them
    /// changed. Nodes whose type does not derive from a child keep theirs.
    pub(crate) fn retype(&mut self) {
        let ty = match &self.kind {
            IrKind::Member { object, name } => match object.ty.underlying() {
                TypeRef::Record(record) => record.field_type(name).cloned(),
                TypeRef::Any => Some(TypeRef::Any),
                _ => None,
            },
            IrKind::Filter { source, .. }
            | IrKind::OrderBy { source, .. }
            | IrKind::Take { source, .. }
            | IrKind::Skip { source, .. }
            | IrKind::Distinct(source) => Some(source.ty.clone()),
            IrKind::Project { body, .. } => Some(TypeRef::list(body.ty.clone())),
            IrKind::Reduce { source, op } => Some(reduced_type(&source.ty, *op)),
            IrKind::With { body, .. } => Some(TypeRef::nullable(body.ty.clone())),
            _ => None,
        };
        if let Some(ty) = ty {
            self.ty = ty;
        }
    }

    /// Gives every reference to parameter `name` the type `ty` and retypes
    /// the nodes above them.
    pub(crate) fn rebind_parameter(&mut self, name: &str, ty: &TypeRef) {
        if let IrKind::Parameter(param) = &self.kind {
            if param == name {
                self.ty = ty.clone();
            }
            return;
        }
        for child in self.children_mut() {
            child.rebind_parameter(name, ty);
        }
        self.retype();
    }
}

fn reduced_type(source: &TypeRef, op: Reduction) -> TypeRef {
    match op {
        Reduction::Count => TypeRef::Int(IntKind::I32),
        Reduction::First | Reduction::Last => source
            .element_type()
            .cloned()
            .map(TypeRef::nullable)
            .unwrap_or(TypeRef::Any),
    }
}

/// A compiled expression plus the constants and services it captured.
///
/// Constants are query variables referenced as `$name`; services are host
/// services a resolver or method declared. Both become extra parameters of
/// the final [`CompiledQuery`](crate::compiler::CompiledQuery).
#[derive(Debug, Clone)]
pub struct TypedNode {
    pub expr: Ir,
    pub constants: IndexMap<String, Value>,
    pub services: IndexSet<ServiceKey>,
}

impl TypedNode {
    pub fn new(expr: Ir) -> Self {
        TypedNode {
            expr,
            constants: IndexMap::new(),
            services: IndexSet::new(),
        }
    }

    pub fn ty(&self) -> &TypeRef {
        &self.expr.ty
    }

    /// Takes over `other`'s captured constants and services and returns its
    /// expression.
    pub fn absorb(&mut self, other: TypedNode) -> Ir {
        self.constants.extend(other.constants);
        self.services.extend(other.services);
        other.expr
    }

    /// Same captures, different expression.
    pub fn with_expr(&self, expr: Ir) -> TypedNode {
        TypedNode {
            expr,
            constants: self.constants.clone(),
            services: self.services.clone(),
        }
    }

    pub fn map(self, f: impl FnOnce(Ir) -> Ir) -> TypedNode {
        TypedNode {
            expr: f(self.expr),
            constants: self.constants,
            services: self.services,
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn require_service(mut self, key: ServiceKey) -> Self {
        self.services.insert(key);
        self
    }
}
