use std::fmt;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    // Equality
    /// Equal (`=`)
    Equal,
    /// Not equal (`!=`)
    NotEqual,

    // Relational
    /// Less than (`<`)
    LessThan,
    /// Less than or equal (`<=`)
    LessEqual,
    /// Greater than (`>`)
    GreaterThan,
    /// Greater than or equal (`>=`)
    GreaterEqual,

    // Arithmetic
    /// Addition or string concatenation (`+`)
    Add,
    /// Subtraction (`-`)
    Subtract,
    /// Multiplication (`*`)
    Multiply,
    /// Division (`/`)
    Divide,
    /// Modulo (`%`)
    Modulo,
    /// Power (`^`)
    Power,

    // Logical
    /// Logical AND (`and`)
    And,
    /// Logical OR (`or`)
    Or,
}

impl BinOp {
    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Equal | BinOp::NotEqual)
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinOp::LessThan | BinOp::LessEqual | BinOp::GreaterThan | BinOp::GreaterEqual
        )
    }

    pub fn is_comparison(self) -> bool {
        self.is_equality() || self.is_relational()
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Subtract
                | BinOp::Multiply
                | BinOp::Divide
                | BinOp::Modulo
                | BinOp::Power
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Equal => "=",
            BinOp::NotEqual => "!=",
            BinOp::LessThan => "<",
            BinOp::LessEqual => "<=",
            BinOp::GreaterThan => ">",
            BinOp::GreaterEqual => ">=",
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Power => "^",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
