use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::ast::Token;

/// Location of a token in the source text (1-based line and column, 0-based
/// character offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {position}")]
pub struct LexError {
    pub message: String,
    pub position: Position,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    token_start: Position,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            token_start: Position {
                line: 1,
                column: 1,
                offset: 0,
            },
        }
    }

    /// Start of the most recently returned token.
    pub fn token_start(&self) -> Position {
        self.token_start
    }

    /// Current offset, i.e. the end of the most recently returned token.
    pub fn offset(&self) -> usize {
        self.position
    }

    /// Source text between two character offsets.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.input.len());
        let start = start.min(end);
        self.input[start..end].iter().collect::<String>().trim().to_string()
    }

    fn here(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            position: self.here(),
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.current_char() == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                // Document comments run to end of line
                while let Some(c) = self.current_char() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self) -> Result<String, LexError> {
        let mut result = String::new();
        self.advance(); // opening quote

        while let Some(ch) = self.current_char() {
            match ch {
                '"' => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    self.advance();
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('"') => result.push('"'),
                        Some('\\') => result.push('\\'),
                        Some('/') => result.push('/'),
                        Some(ch) => {
                            return Err(self.error(format!("Invalid escape sequence: \\{}", ch)));
                        }
                        None => {
                            return Err(
                                self.error("Unterminated string: unexpected end of input after backslash")
                            );
                        }
                    }
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(self.error("Unterminated string: missing closing quote"))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let mut number = String::new();
        let mut is_decimal = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_decimal
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_decimal = true;
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_decimal {
            number
                .parse::<Decimal>()
                .map(Token::Decimal)
                .map_err(|e| self.error(format!("Invalid decimal literal '{}': {}", number, e)))
        } else {
            number
                .parse::<u64>()
                .map(Token::Integer)
                .map_err(|_| self.error(format!("Integer literal '{}' is out of range", number)))
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn double(&mut self, token: Token) -> Token {
        self.advance();
        self.advance();
        token
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        self.token_start = self.here();

        let token = match self.current_char() {
            None => Token::Eof,
            Some('$') => {
                if self
                    .peek_char(1)
                    .is_some_and(|c| c.is_alphabetic() || c == '_')
                {
                    self.advance();
                    Token::Variable(self.read_identifier())
                } else {
                    return Err(self.error("Expected variable name after '$'"));
                }
            }
            Some('.') => {
                if self.peek_char(1) == Some('.') && self.peek_char(2) == Some('.') {
                    self.advance();
                    self.double(Token::Spread)
                } else {
                    self.single(Token::Dot)
                }
            }
            Some(',') => self.single(Token::Comma),
            Some('+') => self.single(Token::Plus),
            Some('-') => self.single(Token::Minus),
            Some('*') => self.single(Token::Star),
            Some('/') => self.single(Token::Slash),
            Some('%') => self.single(Token::Percent),
            Some('^') => self.single(Token::Caret),
            Some('?') => self.single(Token::Question),
            Some(':') => self.single(Token::Colon),
            Some('(') => self.single(Token::LParen),
            Some(')') => self.single(Token::RParen),
            Some('{') => self.single(Token::LBrace),
            Some('}') => self.single(Token::RBrace),
            Some('[') => self.single(Token::LBracket),
            Some(']') => self.single(Token::RBracket),
            Some('=') => {
                if self.peek_char(1) == Some('=') {
                    self.double(Token::Eq)
                } else {
                    self.single(Token::Eq)
                }
            }
            Some('!') => {
                if self.peek_char(1) == Some('=') {
                    self.double(Token::NotEq)
                } else {
                    self.single(Token::Bang)
                }
            }
            Some('<') => {
                if self.peek_char(1) == Some('=') {
                    self.double(Token::LtEq)
                } else {
                    self.single(Token::Lt)
                }
            }
            Some('>') => {
                if self.peek_char(1) == Some('=') {
                    self.double(Token::GtEq)
                } else {
                    self.single(Token::Gt)
                }
            }
            Some('&') => {
                if self.peek_char(1) == Some('&') {
                    self.double(Token::And)
                } else {
                    return Err(self.error("Unexpected '&' (did you mean '&&' or 'and'?)"));
                }
            }
            Some('|') => {
                if self.peek_char(1) == Some('|') {
                    self.double(Token::Or)
                } else {
                    return Err(self.error("Unexpected '|' (did you mean '||' or 'or'?)"));
                }
            }
            Some('"') => Token::String(self.read_string()?),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();

                match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "if" => Token::If,
                    "then" => Token::Then,
                    "else" => Token::Else,
                    "true" => Token::Boolean(true),
                    "false" => Token::Boolean(false),
                    "null" => Token::Null,
                    _ => Token::Identifier(ident),
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some(ch) => return Err(self.error(format!("Unexpected character '{}'", ch))),
        };

        Ok(token)
    }
}

#[test]
fn test_keywords() {
    let mut lexer = Lexer::new("and or not if then else true false null");
    assert_eq!(lexer.next_token().unwrap(), Token::And);
    assert_eq!(lexer.next_token().unwrap(), Token::Or);
    assert_eq!(lexer.next_token().unwrap(), Token::Not);
    assert_eq!(lexer.next_token().unwrap(), Token::If);
    assert_eq!(lexer.next_token().unwrap(), Token::Then);
    assert_eq!(lexer.next_token().unwrap(), Token::Else);
    assert_eq!(lexer.next_token().unwrap(), Token::Boolean(true));
    assert_eq!(lexer.next_token().unwrap(), Token::Boolean(false));
    assert_eq!(lexer.next_token().unwrap(), Token::Null);
}

#[test]
fn test_method_chain() {
    let mut lexer = Lexer::new("people.where(age >= 5)");
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("people".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::Dot);
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("where".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::LParen);
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("age".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::GtEq);
    assert_eq!(lexer.next_token().unwrap(), Token::Integer(5));
    assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    assert_eq!(lexer.next_token().unwrap(), Token::Eof);
}
