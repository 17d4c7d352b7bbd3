//! Schema model: the object types, fields, enums and mutations a document
//! compiles against.
//!
//! Each field carries a resolver producing the typed node for that field
//! given the node of its parent. Member fields read a host member; computed
//! fields compile an EQL expression against the parent; service fields call
//! into a registered host service.

use std::{any::Any, fmt, str::FromStr, sync::Arc};

use indexmap::IndexMap;
use log::debug;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use uuid::Uuid;

use crate::{
    auth::AuthorizationRequirement,
    compiler::{CompileError, Compiler},
    ir::{HostFn, Ir, TypedNode},
    mutation::MutationDescriptor,
    services::ServiceKey,
    types::{IntKind, TypeRef},
    value::{EnumValue, Object, Value, parse_datetime},
};

/// Public (camelCase) spelling of a host member or routine name:
/// `FirstName` becomes `firstName`, `first_name` becomes `firstName` and
/// `URLPath` becomes `urlPath`.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    let chars: Vec<char> = name.chars().collect();
    let mut leading = true;
    for (i, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' {
            upper_next = !out.is_empty();
            leading = false;
            continue;
        }
        if leading {
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if ch.is_uppercase() && (i == 0 || !next_is_lower) {
                out.extend(ch.to_lowercase());
                continue;
            }
            leading = false;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Converted argument values of one field or mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldArguments {
    values: IndexMap<String, Value>,
}

impl FieldArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Value>,
}

impl ArgumentDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        ArgumentDefinition {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Must be supplied: no default and null not allowed.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.ty.admits_null()
    }
}

/// Binds supplied argument values to their declarations, converting each to
/// its declared type and filling in defaults.
pub fn bind_arguments(
    target: &str,
    definitions: &[ArgumentDefinition],
    supplied: &[(String, Value)],
    schema: &Schema,
) -> Result<FieldArguments, CompileError> {
    let invalid = |message: String| CompileError::InvalidArgument {
        target: target.to_string(),
        message,
    };

    if let Some((name, _)) = supplied
        .iter()
        .find(|(name, _)| !definitions.iter().any(|d| d.name == *name))
    {
        return Err(invalid(format!("unknown argument '{}'", name)));
    }

    let mut values = IndexMap::new();
    for def in definitions {
        let value = match supplied.iter().rev().find(|(name, _)| *name == def.name) {
            Some((_, value)) => convert_argument(value, &def.ty, schema)
                .map_err(|msg| invalid(format!("argument '{}': {}", def.name, msg)))?,
            None => match &def.default {
                Some(default) => default.clone(),
                None if def.ty.admits_null() => Value::Null,
                None => return Err(invalid(format!("missing required argument '{}'", def.name))),
            },
        };
        values.insert(def.name.clone(), value);
    }
    Ok(FieldArguments { values })
}

/// Converts a supplied argument value to a declared type.
pub fn convert_argument(value: &Value, ty: &TypeRef, schema: &Schema) -> Result<Value, String> {
    let mismatch = || format!("cannot convert {} to {}", value, ty);
    match (ty, value) {
        (TypeRef::Any, v) => Ok(v.clone()),
        (t, Value::Null) if t.admits_null() => Ok(Value::Null),
        (TypeRef::Nullable(inner), v) => convert_argument(v, inner, schema),
        (_, Value::Null) => Err(format!("null is not allowed for {}", ty)),
        (TypeRef::Boolean, Value::Boolean(_)) | (TypeRef::String, Value::String(_)) => {
            Ok(value.clone())
        }
        (TypeRef::Int(kind), v) => v
            .as_i128()
            .and_then(|n| Value::integer(n, *kind))
            .ok_or_else(|| format!("{} is not a valid {}", v, kind.name())),
        (TypeRef::Decimal, v) => v.as_decimal().map(Value::Decimal).ok_or_else(mismatch),
        (TypeRef::Float, v) => v.as_f64().map(Value::Float).ok_or_else(mismatch),
        (TypeRef::Guid, Value::Guid(_)) | (TypeRef::DateTime, Value::DateTime(_)) => {
            Ok(value.clone())
        }
        (TypeRef::Guid, Value::String(s)) => Uuid::parse_str(s)
            .map(Value::Guid)
            .map_err(|e| format!("'{}' is not a valid Guid: {}", s, e)),
        (TypeRef::DateTime, Value::String(s)) => parse_datetime(s)
            .map(Value::DateTime)
            .ok_or_else(|| format!("'{}' is not a valid DateTime", s)),
        (TypeRef::Enum(name), v) => {
            let enum_type = schema
                .get_enum(name)
                .ok_or_else(|| format!("enum {} is not declared", name))?;
            enum_type.convert(v).ok_or_else(mismatch)
        }
        (TypeRef::List(element), Value::List(items)) => items
            .iter()
            .map(|item| convert_argument(item, element, schema))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (TypeRef::Object(_) | TypeRef::Record(_), Value::Object(_) | Value::Record(_)) => {
            Ok(value.clone())
        }
        _ => Err(mismatch()),
    }
}

/// What a resolver sees while compiling one field.
pub struct FieldContext<'a, 's> {
    compiler: &'a Compiler<'s>,
    context: &'a TypedNode,
    arguments: &'a FieldArguments,
}

impl<'a, 's> FieldContext<'a, 's> {
    pub fn new(
        compiler: &'a Compiler<'s>,
        context: &'a TypedNode,
        arguments: &'a FieldArguments,
    ) -> Self {
        FieldContext {
            compiler,
            context,
            arguments,
        }
    }

    /// Node of the parent the field is resolved on.
    pub fn context(&self) -> &TypedNode {
        self.context
    }

    pub fn arguments(&self) -> &FieldArguments {
        self.arguments
    }

    pub fn compiler(&self) -> &Compiler<'s> {
        self.compiler
    }

    /// Reads host member `name` of the parent.
    pub fn member(&self, name: &str, ty: TypeRef) -> TypedNode {
        self.context
            .with_expr(Ir::member(self.context.expr.clone(), name, ty))
    }

    /// Compiles `source` against the parent. Field arguments are visible as
    /// `$name` variables.
    pub fn compile(&self, source: &str) -> Result<TypedNode, CompileError> {
        let scoped = self.compiler.with_variables(
            self.arguments
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        scoped.compile_source(source, self.context)
    }
}

pub type Resolver =
    Arc<dyn Fn(&FieldContext<'_, '_>) -> Result<TypedNode, CompileError> + Send + Sync>;

/// Sequence arguments a list field accepts in documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceArguments {
    /// `filter: "<EQL predicate>"`
    pub filter: bool,
    /// `orderBy: "<EQL key>"` and `orderByDesc: "<EQL key>"`
    pub sort: bool,
    /// `skip: Int` and `take: Int`
    pub paging: bool,
}

impl SequenceArguments {
    pub fn all() -> Self {
        SequenceArguments {
            filter: true,
            sort: true,
            paging: true,
        }
    }

    pub fn accepts(&self, argument: &str) -> bool {
        match argument {
            "filter" => self.filter,
            "orderBy" | "orderByDesc" => self.sort,
            "skip" | "take" => self.paging,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SchemaField {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    pub authorization: Option<AuthorizationRequirement>,
    pub sequence_arguments: SequenceArguments,
    pub description: Option<String>,
    resolver: Resolver,
}

impl SchemaField {
    pub fn new<F>(name: impl Into<String>, ty: TypeRef, resolver: F) -> Self
    where
        F: Fn(&FieldContext<'_, '_>) -> Result<TypedNode, CompileError> + Send + Sync + 'static,
    {
        SchemaField {
            name: name.into(),
            ty,
            arguments: Vec::new(),
            authorization: None,
            sequence_arguments: SequenceArguments::default(),
            description: None,
            resolver: Arc::new(resolver),
        }
    }

    /// Field exposing host member `member` under its camelCase name.
    pub fn member(member: &str, ty: TypeRef) -> Self {
        let host = member.to_string();
        let result_ty = ty.clone();
        SchemaField::new(to_camel_case(member), ty, move |field| {
            Ok(field.member(&host, result_ty.clone()))
        })
    }

    /// Field computed by an EQL expression over its parent.
    pub fn computed(name: &str, ty: TypeRef, source: &str) -> Self {
        let source = source.to_string();
        SchemaField::new(name, ty, move |field| field.compile(&source))
    }

    /// Field computed by a host service. `inputs` are EQL expressions over
    /// the parent whose values are passed to `func`.
    pub fn service<S, F>(name: &str, ty: TypeRef, inputs: &[&str], func: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&S, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let inputs: Vec<String> = inputs.iter().map(|s| s.to_string()).collect();
        let key = ServiceKey::of::<S>();
        let host: HostFn = Arc::new(move |service: Option<&(dyn Any + Send + Sync)>, args: &[Value]| {
            let service = service
                .and_then(|s| s.downcast_ref::<S>())
                .ok_or_else(|| format!("service {} is not available", key.name()))?;
            func(service, args)
        });
        let field_name = name.to_string();
        let result_ty = ty.clone();
        SchemaField::new(name, ty, move |field| {
            let mut node = field.context().with_expr(Ir::hole());
            let mut args = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let compiled = field.compile(input)?;
                args.push(node.absorb(compiled));
            }
            node.expr = Ir::host_call(
                field_name.clone(),
                Some(key),
                args,
                Arc::clone(&host),
                result_ty.clone(),
            );
            Ok(node.require_service(key))
        })
    }

    pub fn with_argument(mut self, argument: ArgumentDefinition) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_authorization(mut self, requirement: AuthorizationRequirement) -> Self {
        self.authorization = Some(requirement);
        self
    }

    pub fn with_sequence_arguments(mut self, arguments: SequenceArguments) -> Self {
        self.sequence_arguments = arguments;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn resolve(&self, field: &FieldContext<'_, '_>) -> Result<TypedNode, CompileError> {
        (self.resolver)(field)
    }
}

impl fmt::Debug for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaField")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SchemaType {
    pub name: String,
    pub authorization: Option<AuthorizationRequirement>,
    fields: IndexMap<String, SchemaField>,
}

impl SchemaType {
    pub fn new(name: impl Into<String>) -> Self {
        SchemaType {
            name: name.into(),
            authorization: None,
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: SchemaField) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Shorthand for a [`SchemaField::member`] field.
    pub fn member(self, member: &str, ty: TypeRef) -> Self {
        self.field(SchemaField::member(member, ty))
    }

    pub fn with_authorization(mut self, requirement: AuthorizationRequirement) -> Self {
        self.authorization = Some(requirement);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.values()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    members: IndexMap<String, i64>,
}

impl EnumType {
    pub fn new(name: impl Into<String>) -> Self {
        EnumType {
            name: name.into(),
            members: IndexMap::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.insert(name.into(), value);
        self
    }

    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.members.get(member).copied()
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(name, _)| name.as_str())
    }

    /// Enum value for a member name or an integer value of a declared member.
    pub fn convert(&self, value: &Value) -> Option<Value> {
        let raw = match value {
            Value::String(name) => self.value_of(name)?,
            Value::Enum(e) if e.type_name == self.name => e.value,
            other => {
                let n = i64::try_from(other.as_i128()?).ok()?;
                self.name_of(n)?;
                n
            }
        };
        Some(Value::Enum(EnumValue {
            type_name: self.name.clone(),
            name: self.name_of(raw).map(str::to_string),
            value: raw,
        }))
    }
}

/// Compiled-against description of the host model.
#[derive(Debug, Clone)]
pub struct Schema {
    query_type: String,
    types: IndexMap<String, SchemaType>,
    enums: IndexMap<String, EnumType>,
    mutations: IndexMap<String, MutationDescriptor>,
}

impl Default for Schema {
    fn default() -> Self {
        SchemaBuilder::new("Query").build()
    }
}

impl Schema {
    pub fn builder(query_type: &str) -> SchemaBuilder {
        SchemaBuilder::new(query_type)
    }

    /// Type of the host context documents are compiled against.
    pub fn context_type(&self) -> TypeRef {
        TypeRef::Object(self.query_type.clone())
    }

    pub fn get_type(&self, name: &str) -> Option<&SchemaType> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &SchemaType> {
        self.types.values()
    }

    pub fn get_enum(&self, name: &str) -> Option<&EnumType> {
        self.enums.get(name)
    }

    pub fn mutation(&self, name: &str) -> Option<&MutationDescriptor> {
        self.mutations.get(name)
    }

    pub fn mutations(&self) -> impl Iterator<Item = &MutationDescriptor> {
        self.mutations.values()
    }

    /// Schema and matching context value inferred from a JSON sample.
    ///
    /// The root object becomes type `Query`; nested objects are named after
    /// the key they appear under (`address` gives `Address`). List fields
    /// whose elements are objects accept every sequence argument.
    pub fn infer_from_json(sample: &serde_json::Value) -> (Schema, Value) {
        let mut inference = Inference::default();
        let (_, context) = inference.infer("Query", sample);
        let mut builder = SchemaBuilder::new("Query");
        if !inference.types.contains_key("Query") {
            builder = builder.object(SchemaType::new("Query"));
        }
        for (name, fields) in inference.types {
            let mut ty = SchemaType::new(name);
            for (field_name, field_ty) in fields {
                let mut field = SchemaField::member(&field_name, field_ty.clone());
                if field_ty.element_type().is_some_and(TypeRef::is_composite) {
                    field = field.with_sequence_arguments(SequenceArguments::all());
                }
                ty = ty.field(field);
            }
            builder = builder.object(ty);
        }
        (builder.build(), context)
    }
}

#[derive(Default)]
struct Inference {
    types: IndexMap<String, IndexMap<String, TypeRef>>,
}

impl Inference {
    fn infer(&mut self, type_name: &str, json: &serde_json::Value) -> (TypeRef, Value) {
        match json {
            serde_json::Value::Null => (TypeRef::Any, Value::Null),
            serde_json::Value::Bool(b) => (TypeRef::Boolean, Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    (TypeRef::Int(IntKind::I64), Value::Integer(i))
                } else if let Some(u) = n.as_u64() {
                    (TypeRef::Int(IntKind::U64), Value::UInteger(u))
                } else {
                    let text = n.to_string();
                    let decimal = Decimal::from_str(&text)
                        .ok()
                        .or_else(|| Decimal::from_scientific(&text).ok())
                        .or_else(|| n.as_f64().and_then(Decimal::from_f64));
                    match decimal {
                        Some(d) => (TypeRef::Decimal, Value::Decimal(d)),
                        None => (TypeRef::Float, Value::Float(n.as_f64().unwrap_or(f64::NAN))),
                    }
                }
            }
            serde_json::Value::String(s) => (TypeRef::String, Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let mut element = None::<TypeRef>;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let (ty, value) = self.infer(type_name, item);
                    element = Some(match element {
                        None => ty,
                        Some(prev) => unify(prev, ty),
                    });
                    values.push(value);
                }
                (TypeRef::list(element.unwrap_or(TypeRef::Any)), Value::List(values))
            }
            serde_json::Value::Object(map) => {
                let mut object = Object::new(type_name);
                for (key, item) in map {
                    let (ty, value) = self.infer(&to_type_name(key), item);
                    let fields = self.types.entry(type_name.to_string()).or_default();
                    let merged = match fields.shift_remove(key) {
                        Some(prev) => unify(prev, ty),
                        None => ty,
                    };
                    fields.insert(key.clone(), merged);
                    object.fields.insert(key.clone(), value);
                }
                self.types.entry(type_name.to_string()).or_default();
                (TypeRef::Object(type_name.to_string()), Value::Object(object))
            }
        }
    }
}

fn unify(a: TypeRef, b: TypeRef) -> TypeRef {
    match (a, b) {
        (a, b) if a == b => a,
        (TypeRef::Any, other) | (other, TypeRef::Any) => other,
        (TypeRef::Int(_), TypeRef::Decimal) | (TypeRef::Decimal, TypeRef::Int(_)) => {
            TypeRef::Decimal
        }
        (TypeRef::List(a), TypeRef::List(b)) => TypeRef::list(unify(*a, *b)),
        _ => TypeRef::Any,
    }
}

fn to_type_name(key: &str) -> String {
    let camel = to_camel_case(key);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Anonymous".to_string(),
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(query_type: &str) -> Self {
        SchemaBuilder {
            schema: Schema {
                query_type: query_type.to_string(),
                types: IndexMap::new(),
                enums: IndexMap::new(),
                mutations: IndexMap::new(),
            },
        }
    }

    pub fn object(mut self, ty: SchemaType) -> Self {
        self.schema.types.insert(ty.name.clone(), ty);
        self
    }

    pub fn enumeration(mut self, ty: EnumType) -> Self {
        self.schema.enums.insert(ty.name.clone(), ty);
        self
    }

    /// Registers a mutation. Mutations without an explicit context type run
    /// against the query type.
    pub fn mutation(mut self, mutation: MutationDescriptor) -> Self {
        let mutation = if mutation.context_type() == &TypeRef::Any {
            mutation.with_context_type(self.schema.context_type())
        } else {
            mutation
        };
        self.schema
            .mutations
            .insert(mutation.name().to_string(), mutation);
        self
    }

    pub fn build(mut self) -> Schema {
        if !self.schema.types.contains_key(&self.schema.query_type) {
            let name = self.schema.query_type.clone();
            self.schema.types.insert(name.clone(), SchemaType::new(name));
        }
        debug!(
            "built schema with {} type(s), {} enum(s), {} mutation(s)",
            self.schema.types.len(),
            self.schema.enums.len(),
            self.schema.mutations.len()
        );
        self.schema
    }
}
