use rust_decimal::Decimal;

use crate::ast::BinOp;

/// Parse-tree node of the expression language.
///
/// The compiler walks this tree against a schema and turns it into a typed
/// [`crate::ir::Ir`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    /// Signed 64-bit integer literal
    ///
    /// # Example
    /// ```text
    /// 42
    /// ```
    Integer(i64),

    /// Decimal literal
    ///
    /// # Example
    /// ```text
    /// 12.50
    /// ```
    Decimal(Decimal),

    /// String literal
    ///
    /// # Example
    /// ```text
    /// "hello"
    /// ```
    String(String),

    /// Boolean literal
    Boolean(bool),

    /// Null literal
    Null,

    // References
    /// Variable placeholder substituted from the request variables
    ///
    /// # Example
    /// ```text
    /// $minAge
    /// ```
    Variable(String),

    /// Bare identifier, resolved against the current context
    ///
    /// # Example
    /// ```text
    /// people
    /// ```
    Identifier(String),

    /// Member access on the result of another expression
    ///
    /// # Examples
    /// ```text
    /// manager.name
    /// people.first().address.city
    /// ```
    Access { object: Box<Expr>, name: String },

    /// Method call
    ///
    /// Without an object the method applies to the current context.
    ///
    /// # Examples
    /// ```text
    /// people.where(age > 18)
    /// name.startsWith("A")
    /// not(active)
    /// ```
    Call {
        object: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
    },

    // Operations
    /// Binary operation (arithmetic, comparison, logical)
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Conditional expression
    ///
    /// `test_text` keeps the literal source of the test for error reporting.
    ///
    /// # Examples
    /// ```text
    /// if age > 18 then "adult" else "minor"
    /// age > 18 ? "adult" : "minor"
    /// ```
    Conditional {
        test: Box<Expr>,
        test_text: String,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Whether the node is a literal constant.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Integer(_) | Expr::Decimal(_) | Expr::String(_) | Expr::Boolean(_) | Expr::Null
        )
    }
}
