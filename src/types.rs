//! Static types carried by every compiled node.

use std::{fmt, sync::Arc};

use crate::record::RecordType;

/// Fixed-width integer kinds of the host model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    I16,
    I32,
    I64,
    U16,
    U32,
    U64,
}

/// Which integer kinds a right-hand operand may be converted to when it meets
/// a left-hand operand of a different width or signedness. The conversion is
/// range-checked when the compiled tree runs.
const INT_CONVERSIONS: [(IntKind, &[IntKind]); 6] = [
    (IntKind::I16, &[IntKind::I32, IntKind::I64, IntKind::U16, IntKind::U32, IntKind::U64]),
    (IntKind::I32, &[IntKind::I16, IntKind::I64, IntKind::U16, IntKind::U32, IntKind::U64]),
    (IntKind::I64, &[IntKind::I16, IntKind::I32, IntKind::U16, IntKind::U32, IntKind::U64]),
    (IntKind::U16, &[IntKind::I16, IntKind::I32, IntKind::I64, IntKind::U32, IntKind::U64]),
    (IntKind::U32, &[IntKind::I16, IntKind::I32, IntKind::I64, IntKind::U16, IntKind::U64]),
    (IntKind::U64, &[IntKind::I16, IntKind::I32, IntKind::I64, IntKind::U16, IntKind::U32]),
];

impl IntKind {
    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    pub fn min(self) -> i128 {
        match self {
            IntKind::I16 => i16::MIN as i128,
            IntKind::I32 => i32::MIN as i128,
            IntKind::I64 => i64::MIN as i128,
            IntKind::U16 | IntKind::U32 | IntKind::U64 => 0,
        }
    }

    pub fn max(self) -> i128 {
        match self {
            IntKind::I16 => i16::MAX as i128,
            IntKind::I32 => i32::MAX as i128,
            IntKind::I64 => i64::MAX as i128,
            IntKind::U16 => u16::MAX as i128,
            IntKind::U32 => u32::MAX as i128,
            IntKind::U64 => u64::MAX as i128,
        }
    }

    pub fn fits(self, value: i128) -> bool {
        value >= self.min() && value <= self.max()
    }

    /// Whether a value of `self` may be converted to `target`.
    pub fn converts_to(self, target: IntKind) -> bool {
        self == target
            || INT_CONVERSIONS
                .iter()
                .any(|(from, to)| *from == self && to.contains(&target))
    }

    pub fn name(self) -> &'static str {
        match self {
            IntKind::I16 => "Int16",
            IntKind::I32 => "Int32",
            IntKind::I64 => "Int64",
            IntKind::U16 => "UInt16",
            IntKind::U32 => "UInt32",
            IntKind::U64 => "UInt64",
        }
    }
}

/// Static type of a compiled expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// Dynamically typed; operations are checked when the tree runs
    Any,
    /// Type of the `null` literal
    Null,
    Boolean,
    Int(IntKind),
    Float,
    Decimal,
    String,
    /// Unique identifier
    Guid,
    DateTime,
    /// Enumeration declared in the schema
    Enum(String),
    /// Host object type declared in the schema
    Object(String),
    /// Synthesized projection record
    Record(Arc<RecordType>),
    /// Ordered collection
    List(Box<TypeRef>),
    /// Optional value type
    Nullable(Box<TypeRef>),
}

impl TypeRef {
    pub fn list(element: TypeRef) -> TypeRef {
        TypeRef::List(Box::new(element))
    }

    /// Optional version of this type. Reference-like types already admit
    /// null and are returned unchanged.
    pub fn nullable(inner: TypeRef) -> TypeRef {
        if inner.admits_null() {
            inner
        } else {
            TypeRef::Nullable(Box::new(inner))
        }
    }

    /// Strips one level of `Nullable`.
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    /// Whether `null` is a legal value of this type.
    pub fn admits_null(&self) -> bool {
        matches!(
            self,
            TypeRef::Any
                | TypeRef::Null
                | TypeRef::String
                | TypeRef::Object(_)
                | TypeRef::Record(_)
                | TypeRef::List(_)
                | TypeRef::Nullable(_)
        )
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, TypeRef::List(_))
    }

    pub fn element_type(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::List(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeRef::Boolean)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.underlying(), TypeRef::String)
    }

    pub fn int_kind(&self) -> Option<IntKind> {
        match self.underlying() {
            TypeRef::Int(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.underlying(),
            TypeRef::Int(_) | TypeRef::Float | TypeRef::Decimal
        )
    }

    /// Types with a total order usable by relational operators and sorting.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self.underlying(),
            TypeRef::Int(_)
                | TypeRef::Float
                | TypeRef::Decimal
                | TypeRef::String
                | TypeRef::DateTime
                | TypeRef::Guid
                | TypeRef::Enum(_)
                | TypeRef::Boolean
                | TypeRef::Any
        )
    }

    /// Whether a selection set can be applied to values of this type.
    pub fn is_composite(&self) -> bool {
        match self.underlying() {
            TypeRef::Object(_) | TypeRef::Record(_) => true,
            TypeRef::List(element) => element.is_composite(),
            _ => false,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Any => f.write_str("Any"),
            TypeRef::Null => f.write_str("Null"),
            TypeRef::Boolean => f.write_str("Boolean"),
            TypeRef::Int(kind) => f.write_str(kind.name()),
            TypeRef::Float => f.write_str("Float"),
            TypeRef::Decimal => f.write_str("Decimal"),
            TypeRef::String => f.write_str("String"),
            TypeRef::Guid => f.write_str("Guid"),
            TypeRef::DateTime => f.write_str("DateTime"),
            TypeRef::Enum(name) | TypeRef::Object(name) => f.write_str(name),
            TypeRef::Record(record) => f.write_str(&record.name()),
            TypeRef::List(element) => write!(f, "[{}]", element),
            TypeRef::Nullable(inner) => write!(f, "{}?", inner),
        }
    }
}
