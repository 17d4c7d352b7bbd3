use rust_decimal::Decimal;

/// Lexical tokens shared by the expression language and the query-document
/// grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Unsigned integer literal text
    ///
    /// Sign is handled by the parser so that `-9223372036854775808` stays
    /// representable.
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 9223372036854775808
    /// ```
    Integer(u64),

    /// Decimal literal
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 0.5
    /// ```
    Decimal(Decimal),

    /// String literal enclosed in double quotes
    ///
    /// # Examples
    /// ```text
    /// "hello"
    /// "\"quoted\" text"
    /// ```
    String(String),

    /// Boolean values
    Boolean(bool),

    /// Null value
    Null,

    /// Variable placeholder (`$name`)
    ///
    /// # Examples
    /// ```text
    /// $minAge
    /// $id
    /// ```
    Variable(String),

    /// Field name, method name, type name or document keyword
    ///
    /// # Examples
    /// ```text
    /// people
    /// orderByDesc
    /// fragment
    /// ```
    Identifier(String),

    // Keywords
    /// Logical AND (`and` or `&&`)
    And,

    /// Logical OR (`or` or `||`)
    Or,

    /// Negation keyword (`not`)
    Not,

    /// `if` of `if <test> then <a> else <b>`
    If,

    /// `then`
    Then,

    /// `else`
    Else,

    // Operators
    /// Equality (`=` or `==`); also the default marker in variable definitions
    Eq,

    /// Inequality (`!=`)
    NotEq,

    /// Less than
    Lt,

    /// Less than or equal
    LtEq,

    /// Greater than
    Gt,

    /// Greater than or equal
    GtEq,

    /// Addition or string concatenation
    Plus,

    /// Subtraction or unary minus
    Minus,

    /// Multiplication
    Star,

    /// Division
    Slash,

    /// Modulo
    Percent,

    /// Power
    Caret,

    /// Negation (`!`); marks a non-null type in variable definitions
    Bang,

    /// Ternary test marker
    Question,

    // Delimiters
    /// Left parenthesis for grouping, arguments and method calls
    LParen,

    /// Right parenthesis
    RParen,

    /// Left brace opening a selection set or object value
    LBrace,

    /// Right brace
    RBrace,

    /// Left bracket opening a list value or list type
    LBracket,

    /// Right bracket
    RBracket,

    /// Dot separating path segments and method calls
    Dot,

    /// Fragment spread (`...`)
    Spread,

    /// Comma separating arguments
    Comma,

    /// Colon for aliases, arguments and the ternary else branch
    Colon,

    /// End of input
    Eof,
}

impl Token {
    /// Returns the source spelling of keyword tokens.
    ///
    /// Document names may collide with expression keywords (a field called
    /// `not` or `if`), so the document parser accepts them as names.
    pub fn keyword_text(&self) -> Option<&'static str> {
        match self {
            Token::And => Some("and"),
            Token::Or => Some("or"),
            Token::Not => Some("not"),
            Token::If => Some("if"),
            Token::Then => Some("then"),
            Token::Else => Some("else"),
            Token::Boolean(true) => Some("true"),
            Token::Boolean(false) => Some("false"),
            Token::Null => Some("null"),
            _ => None,
        }
    }
}
