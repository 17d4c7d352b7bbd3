use rust_decimal::Decimal;

use crate::lexer::Position;

/// A parsed query document: operations plus the fragments they may spread.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub operations: Vec<Operation>,
    pub fragments: Vec<Fragment>,
}

impl Document {
    pub fn fragment(&self, name: &str) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// One `query`/`mutation` block, or the anonymous `{ ... }` shorthand.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selections: Vec<Selection>,
}

/// `$name: Type = default` in an operation header.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub name: String,
    pub type_name: String,
    pub default: Option<ArgValue>,
}

/// `fragment Name on Type { ... }`
#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    pub type_condition: String,
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone)]
pub enum Selection {
    Field(FieldSelection),
    /// `...fragmentName`
    FragmentSpread { name: String, position: Position },
}

/// A requested field with its optional alias, arguments and sub-selection.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Vec<(String, ArgValue)>,
    pub selections: Vec<Selection>,
    pub position: Position,
}

impl FieldSelection {
    /// The key this field is returned under.
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Literal argument value in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(Decimal),
    String(String),
    Boolean(bool),
    Null,
    /// Bare name, e.g. an enum member
    Enum(String),
    Variable(String),
    List(Vec<ArgValue>),
    Object(Vec<(String, ArgValue)>),
}
