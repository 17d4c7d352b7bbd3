use std::mem;

use thiserror::Error;

use crate::{
    ast::{
        ArgValue, BinOp, Document, Expr, FieldSelection, Fragment, Operation, OperationKind,
        Selection, Token, VariableDefinition,
    },
    lexer::{LexError, Lexer, Position},
};

/// Malformed source text, with the position where parsing stopped.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {position}")]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            position: e.position,
        }
    }
}

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    current_start: Position,
    /// Offset just past the previously consumed token
    prev_end: usize,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Result<Self, ParseError> {
        let current_token = lexer.next_token()?;
        let current_start = lexer.token_start();
        Ok(Parser {
            lexer,
            current_token,
            current_start,
            prev_end: 0,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.prev_end = self.lexer.offset();
        self.current_token = self.lexer.next_token()?;
        self.current_start = self.lexer.token_start();
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.current_start,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if mem::discriminant(&self.current_token) != mem::discriminant(&expected) {
            return Err(self.error(format!(
                "Expected {:?}, got {:?}",
                expected, self.current_token
            )));
        }
        self.advance()
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn skip_commas(&mut self) -> Result<(), ParseError> {
        while self.check(&Token::Comma) {
            self.advance()?;
        }
        Ok(())
    }

    /// Name token: identifiers plus keywords, which are legal names in paths
    /// and documents.
    fn parse_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.current_token {
            Token::Identifier(n) => n.clone(),
            other => match other.keyword_text() {
                Some(k) => k.to_string(),
                None => {
                    return Err(self.error(format!("Expected a name, got {:?}", other)));
                }
            },
        };
        self.advance()?;
        Ok(name)
    }

    fn integer_literal(&self, n: u64, negative: bool) -> Result<i64, ParseError> {
        if negative {
            if n == i64::MAX as u64 + 1 {
                Ok(i64::MIN)
            } else if n <= i64::MAX as u64 {
                Ok(-(n as i64))
            } else {
                Err(self.error(format!("Integer literal -{} is out of range", n)))
            }
        } else if n <= i64::MAX as u64 {
            Ok(n as i64)
        } else {
            Err(self.error(format!("Integer literal {} is out of range", n)))
        }
    }

    /// Parse primary expressions: literals, variables, identifiers, calls
    /// without a receiver, groups and `if` conditionals
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Integer(n) => {
                let value = self.integer_literal(n, false)?;
                self.advance()?;
                Ok(Expr::Integer(value))
            }
            Token::Decimal(d) => {
                self.advance()?;
                Ok(Expr::Decimal(d))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(Expr::String(s))
            }
            Token::Boolean(b) => {
                self.advance()?;
                Ok(Expr::Boolean(b))
            }
            Token::Null => {
                self.advance()?;
                Ok(Expr::Null)
            }
            Token::Variable(name) => {
                self.advance()?;
                Ok(Expr::Variable(name))
            }
            Token::Identifier(name) => {
                self.advance()?;
                if self.check(&Token::LParen) {
                    let args = self.parse_call_args()?;
                    Ok(Expr::Call {
                        object: None,
                        method: name,
                        args,
                    })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::If => {
                self.advance()?;
                let start = self.current_start.offset;
                let test = self.parse_expression()?;
                let test_text = self.lexer.slice(start, self.prev_end);
                self.expect(Token::Then)?;
                let then = self.parse_expression()?;
                self.expect(Token::Else)?;
                let otherwise = self.parse_expression()?;
                Ok(Expr::Conditional {
                    test: Box::new(test),
                    test_text,
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                })
            }
            token => {
                self.current_token = token;
                Err(self.error(format!(
                    "Unexpected token in expression: {:?}",
                    self.current_token
                )))
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = vec![];

        while !self.check(&Token::RParen) {
            args.push(self.parse_expression()?);

            if !self.check(&Token::RParen) {
                self.expect(Token::Comma)?;
            }
        }

        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Parse member access and method calls chained on a primary
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        while self.check(&Token::Dot) {
            self.advance()?;
            let name = self.parse_name()?;

            if self.check(&Token::LParen) {
                let args = self.parse_call_args()?;
                expr = Expr::Call {
                    object: Some(Box::new(expr)),
                    method: name,
                    args,
                };
            } else {
                expr = Expr::Access {
                    object: Box::new(expr),
                    name,
                };
            }
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match &self.current_token {
            Token::Not | Token::Bang => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::Call {
                    object: None,
                    method: "not".to_string(),
                    args: vec![operand],
                })
            }
            Token::Minus => {
                self.advance()?;
                match self.current_token {
                    Token::Integer(n) => {
                        let value = self.integer_literal(n, true)?;
                        self.advance()?;
                        Ok(Expr::Integer(value))
                    }
                    Token::Decimal(d) => {
                        self.advance()?;
                        Ok(Expr::Decimal(-d))
                    }
                    _ => {
                        // Represent as 0 - operand
                        let operand = self.parse_unary()?;
                        Ok(Expr::BinaryOp {
                            op: BinOp::Subtract,
                            left: Box::new(Expr::Integer(0)),
                            right: Box::new(operand),
                        })
                    }
                }
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_unary()?;

        if self.check(&Token::Caret) {
            self.advance()?;
            // Right-associative
            let right = self.parse_power()?;
            return Ok(Expr::BinaryOp {
                op: BinOp::Power,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;

        loop {
            let op = match &self.current_token {
                Token::Star => BinOp::Multiply,
                Token::Slash => BinOp::Divide,
                Token::Percent => BinOp::Modulo,
                _ => break,
            };

            self.advance()?;
            let right = self.parse_power()?;

            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Subtract,
                _ => break,
            };

            self.advance()?;
            let right = self.parse_multiplicative()?;

            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match &self.current_token {
                Token::Lt => BinOp::LessThan,
                Token::LtEq => BinOp::LessEqual,
                Token::Gt => BinOp::GreaterThan,
                Token::GtEq => BinOp::GreaterEqual,
                _ => break,
            };

            self.advance()?;
            let right = self.parse_additive()?;

            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;

        loop {
            let op = match &self.current_token {
                Token::Eq => BinOp::Equal,
                Token::NotEq => BinOp::NotEqual,
                _ => break,
            };

            self.advance()?;
            let right = self.parse_relational()?;

            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;

        while self.check(&Token::And) {
            self.advance()?;
            let right = self.parse_equality()?;

            left = Expr::BinaryOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;

        while self.check(&Token::Or) {
            self.advance()?;
            let right = self.parse_and()?;

            left = Expr::BinaryOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_start.offset;
        let test = self.parse_or()?;

        if !self.check(&Token::Question) {
            return Ok(test);
        }

        let test_text = self.lexer.slice(start, self.prev_end);
        self.advance()?;
        let then = self.parse_ternary()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_ternary()?;

        Ok(Expr::Conditional {
            test: Box::new(test),
            test_text,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    /// Parse a complete standalone expression
    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        self.expect(Token::Eof)?;
        Ok(expr)
    }
}

impl Parser {
    /// Parse a complete query document
    pub fn parse_document(&mut self) -> Result<Document, ParseError> {
        let mut document = Document::default();

        while !self.check(&Token::Eof) {
            match &self.current_token {
                Token::LBrace => {
                    let selections = self.parse_selection_set()?;
                    document.operations.push(Operation {
                        kind: OperationKind::Query,
                        name: None,
                        variables: vec![],
                        selections,
                    });
                }
                Token::Identifier(keyword) if keyword == "query" || keyword == "mutation" => {
                    let kind = if keyword == "query" {
                        OperationKind::Query
                    } else {
                        OperationKind::Mutation
                    };
                    self.advance()?;
                    document.operations.push(self.parse_operation(kind)?);
                }
                Token::Identifier(keyword) if keyword == "fragment" => {
                    self.advance()?;
                    document.fragments.push(self.parse_fragment()?);
                }
                other => {
                    return Err(self.error(format!(
                        "Expected an operation or fragment definition, got {:?}",
                        other
                    )));
                }
            }
        }

        if document.operations.is_empty() {
            return Err(self.error("Document contains no operations"));
        }
        Ok(document)
    }

    fn parse_operation(&mut self, kind: OperationKind) -> Result<Operation, ParseError> {
        let name = if self.check(&Token::LBrace) || self.check(&Token::LParen) {
            None
        } else {
            Some(self.parse_name()?)
        };

        let variables = if self.check(&Token::LParen) {
            self.parse_variable_definitions()?
        } else {
            vec![]
        };

        let selections = self.parse_selection_set()?;
        Ok(Operation {
            kind,
            name,
            variables,
            selections,
        })
    }

    fn parse_variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, ParseError> {
        self.expect(Token::LParen)?;
        let mut definitions = vec![];

        while !self.check(&Token::RParen) {
            let name = match mem::replace(&mut self.current_token, Token::Eof) {
                Token::Variable(name) => name,
                token => {
                    self.current_token = token;
                    return Err(self.error(format!(
                        "Expected variable definition, got {:?}",
                        self.current_token
                    )));
                }
            };
            self.advance()?;
            self.expect(Token::Colon)?;
            let type_name = self.parse_type_name()?;

            let default = if self.check(&Token::Eq) {
                self.advance()?;
                Some(self.parse_value()?)
            } else {
                None
            };

            definitions.push(VariableDefinition {
                name,
                type_name,
                default,
            });
            self.skip_commas()?;
        }

        self.expect(Token::RParen)?;
        Ok(definitions)
    }

    fn parse_type_name(&mut self) -> Result<String, ParseError> {
        let mut type_name = if self.check(&Token::LBracket) {
            self.advance()?;
            let inner = self.parse_type_name()?;
            self.expect(Token::RBracket)?;
            format!("[{}]", inner)
        } else {
            self.parse_name()?
        };

        if self.check(&Token::Bang) {
            self.advance()?;
            type_name.push('!');
        }
        Ok(type_name)
    }

    fn parse_fragment(&mut self) -> Result<Fragment, ParseError> {
        let name = self.parse_name()?;

        match &self.current_token {
            Token::Identifier(on) if on == "on" => self.advance()?,
            other => {
                return Err(self.error(format!(
                    "Expected 'on' in fragment definition, got {:?}",
                    other
                )));
            }
        }

        let type_condition = self.parse_name()?;
        let selections = self.parse_selection_set()?;
        Ok(Fragment {
            name,
            type_condition,
            selections,
        })
    }

    fn parse_selection_set(&mut self) -> Result<Vec<Selection>, ParseError> {
        self.expect(Token::LBrace)?;
        let mut selections = vec![];

        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("Unterminated selection set: missing '}'"));
            }

            let position = self.current_start;
            if self.check(&Token::Spread) {
                self.advance()?;
                let name = self.parse_name()?;
                selections.push(Selection::FragmentSpread { name, position });
            } else {
                selections.push(Selection::Field(self.parse_field()?));
            }
            self.skip_commas()?;
        }

        self.expect(Token::RBrace)?;
        Ok(selections)
    }

    fn parse_field(&mut self) -> Result<FieldSelection, ParseError> {
        let position = self.current_start;
        let first = self.parse_name()?;

        let (alias, name) = if self.check(&Token::Colon) {
            self.advance()?;
            (Some(first), self.parse_name()?)
        } else {
            (None, first)
        };

        let arguments = if self.check(&Token::LParen) {
            self.parse_arguments()?
        } else {
            vec![]
        };

        let selections = if self.check(&Token::LBrace) {
            self.parse_selection_set()?
        } else {
            vec![]
        };

        Ok(FieldSelection {
            name,
            alias,
            arguments,
            selections,
            position,
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<(String, ArgValue)>, ParseError> {
        self.expect(Token::LParen)?;
        let mut arguments = vec![];

        while !self.check(&Token::RParen) {
            let name = self.parse_name()?;
            self.expect(Token::Colon)?;
            let value = self.parse_value()?;
            arguments.push((name, value));
            self.skip_commas()?;
        }

        self.expect(Token::RParen)?;
        Ok(arguments)
    }

    fn parse_value(&mut self) -> Result<ArgValue, ParseError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Variable(name) => {
                self.advance()?;
                Ok(ArgValue::Variable(name))
            }
            Token::Integer(n) => {
                let value = self.integer_literal(n, false)?;
                self.advance()?;
                Ok(ArgValue::Int(value))
            }
            Token::Decimal(d) => {
                self.advance()?;
                Ok(ArgValue::Float(d))
            }
            Token::Minus => {
                self.advance()?;
                match self.current_token {
                    Token::Integer(n) => {
                        let value = self.integer_literal(n, true)?;
                        self.advance()?;
                        Ok(ArgValue::Int(value))
                    }
                    Token::Decimal(d) => {
                        self.advance()?;
                        Ok(ArgValue::Float(-d))
                    }
                    _ => Err(self.error("Expected a number after '-'")),
                }
            }
            Token::String(s) => {
                self.advance()?;
                Ok(ArgValue::String(s))
            }
            Token::Boolean(b) => {
                self.advance()?;
                Ok(ArgValue::Boolean(b))
            }
            Token::Null => {
                self.advance()?;
                Ok(ArgValue::Null)
            }
            Token::Identifier(name) => {
                self.advance()?;
                Ok(ArgValue::Enum(name))
            }
            Token::LBracket => {
                self.advance()?;
                let mut items = vec![];
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_value()?);
                    self.skip_commas()?;
                }
                self.expect(Token::RBracket)?;
                Ok(ArgValue::List(items))
            }
            Token::LBrace => {
                self.advance()?;
                let mut fields = vec![];
                while !self.check(&Token::RBrace) {
                    let name = self.parse_name()?;
                    self.expect(Token::Colon)?;
                    fields.push((name, self.parse_value()?));
                    self.skip_commas()?;
                }
                self.expect(Token::RBrace)?;
                Ok(ArgValue::Object(fields))
            }
            token => {
                self.current_token = token;
                Err(self.error(format!(
                    "Unexpected token in argument value: {:?}",
                    self.current_token
                )))
            }
        }
    }
}
