use std::{cmp::Ordering, fmt, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};
use uuid::Uuid;

use crate::{
    record::RecordType,
    types::{IntKind, TypeRef},
};

/// A runtime value flowing through a compiled expression tree.
///
/// Host data is represented as [`Object`]s whose `type_name` matches a schema
/// type, while projections produce [`Record`]s of a synthesized record type.
///
/// # Numeric values
///
/// Integers, floats and decimals are kept distinct. Equality and ordering
/// between them compare by numeric value, so `Integer(2)` equals
/// `Decimal(2.0)`.
///
/// # Examples
///
/// ```
/// use eql_lang::{Object, Value};
///
/// let person = Object::new("Person")
///     .with("name", "Ada")
///     .with("age", 36);
/// let value = Value::Object(person);
/// assert_eq!(value.get("name"), Some(&Value::from("Ada")));
/// ```
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    /// Signed integer of any declared width
    Integer(i64),
    /// Unsigned integer that does not fit in `i64`
    UInteger(u64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    Enum(EnumValue),
    List(Vec<Value>),
    Object(Object),
    Record(Record),
}

/// Member of a schema enumeration.
#[derive(Debug, Clone)]
pub struct EnumValue {
    pub type_name: String,
    /// Member name, when known
    pub name: Option<String>,
    pub value: i64,
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.value == other.value
    }
}

/// Host object: a named type with ordered members.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Object {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Instance of a synthesized record type. Values are stored in signature
/// order.
#[derive(Debug, Clone)]
pub struct Record {
    ty: Arc<RecordType>,
    values: Vec<Value>,
}

impl Record {
    /// A record with every field null.
    pub fn new(ty: Arc<RecordType>) -> Self {
        let values = vec![Value::Null; ty.len()];
        Record { ty, values }
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.ty
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.ty.field_index(name).and_then(|i| self.values.get(i))
    }

    /// (name, value) pairs in signature order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.ty
            .fields()
            .iter()
            .map(|(name, _)| name.as_str())
            .zip(self.values.iter())
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.values == other.values
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::UInteger(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Record(_) => "record",
        }
    }

    /// Static type of a value supplied from outside a compiled tree, such as
    /// a query variable.
    pub fn static_type(&self) -> TypeRef {
        match self {
            Value::Null => TypeRef::Null,
            Value::Boolean(_) => TypeRef::Boolean,
            Value::Integer(_) => TypeRef::Int(IntKind::I64),
            Value::UInteger(_) => TypeRef::Int(IntKind::U64),
            Value::Float(_) => TypeRef::Float,
            Value::Decimal(_) => TypeRef::Decimal,
            Value::String(_) => TypeRef::String,
            Value::Guid(_) => TypeRef::Guid,
            Value::DateTime(_) => TypeRef::DateTime,
            Value::Enum(e) => TypeRef::Enum(e.type_name.clone()),
            Value::List(items) => TypeRef::list(
                items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Value::static_type)
                    .unwrap_or(TypeRef::Any),
            ),
            Value::Object(o) => TypeRef::Object(o.type_name.clone()),
            Value::Record(r) => TypeRef::Record(Arc::clone(&r.ty)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral value widened to `i128`.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n as i128),
            Value::UInteger(n) => Some(*n as i128),
            Value::Enum(e) => Some(e.value as i128),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(n) => Some(Decimal::from(*n)),
            Value::UInteger(n) => Some(Decimal::from(*n)),
            Value::Decimal(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::UInteger(n) => Some(*n as f64),
            Value::Decimal(d) => d.to_f64(),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Member lookup on objects and records.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(o) => o.get(name),
            Value::Record(r) => r.get(name),
            _ => None,
        }
    }

    /// Integer value in the representation used for `kind`, if in range.
    pub fn integer(value: i128, kind: IntKind) -> Option<Value> {
        if !kind.fits(value) {
            return None;
        }
        if let Ok(n) = i64::try_from(value) {
            Some(Value::Integer(n))
        } else {
            u64::try_from(value).ok().map(Value::UInteger)
        }
    }

    /// Value ordering used by relational operators and sorting. Numbers of
    /// different representations compare by value; `None` means the values
    /// are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Guid(a), Guid(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Enum(a), Enum(b)) if a.type_name == b.type_name => Some(a.value.cmp(&b.value)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Float(_), _) | (_, Float(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            (Integer(_) | UInteger(_), Integer(_) | UInteger(_)) => {
                Some(self.as_i128()?.cmp(&other.as_i128()?))
            }
            (Integer(_) | UInteger(_) | Decimal(_), Integer(_) | UInteger(_) | Decimal(_)) => {
                Some(self.as_decimal()?.cmp(&other.as_decimal()?))
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (List(a), List(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            (Enum(a), Enum(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::UInteger(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Guid(g) => write!(f, "{}", g),
            Value::DateTime(d) => write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Enum(e) => match &e.name {
                Some(name) => f.write_str(name),
                None => write!(f, "{}({})", e.type_name, e.value),
            },
            Value::List(items) => write!(f, "[{} item(s)]", items.len()),
            Value::Object(o) => f.write_str(&o.type_name),
            Value::Record(r) => f.write_str(&r.ty.name()),
        }
    }
}

/// Parses the date and timestamp shapes accepted in query text: a bare date,
/// a local timestamp, or an RFC 3339 timestamp (normalized to UTC).
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(local);
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(local);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_utc())
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::UInteger(n),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::DateTime(d)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
