//! Recursive-descent parser for the filter expression syntax.
//!
//! ```text
//! expr    := and ( ("||" | "or") and )*
//! and     := unary ( ("&&" | "and") unary )*
//! unary   := ("!" | "not") unary | primary
//! primary := "(" expr ")" | "has" "(" word ")" | word op value
//! op      := "=" | "==" | "!=" | "~" | "<" | "<=" | ">" | ">="
//! value   := word | "quoted" | 'quoted'
//! ```

use crate::filter::ast::{CompareOp, Pattern, Predicate};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    Empty,
    UnexpectedChar { ch: char, position: usize },
    UnterminatedString { position: usize },
    UnexpectedToken { found: String, position: usize },
    UnexpectedEnd,
    InvalidRegex { pattern: String, message: String },
    ExpectedNumber(String),
}

impl Display for FilterParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "filter expression must not be blank"),
            Self::UnexpectedChar { ch, position } => {
                write!(f, "unexpected character `{ch}` at {position}")
            }
            Self::UnterminatedString { position } => {
                write!(f, "unterminated string starting at {position}")
            }
            Self::UnexpectedToken { found, position } => {
                write!(f, "unexpected `{found}` at {position}")
            }
            Self::UnexpectedEnd => write!(f, "unexpected end of filter expression"),
            Self::InvalidRegex { pattern, message } => {
                write!(f, "invalid pattern `{pattern}`: {message}")
            }
            Self::ExpectedNumber(value) => write!(f, "expected a number, got `{value}`"),
        }
    }
}

impl Error for FilterParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Op(CompareOp),
    Tilde,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(word) => word.clone(),
            Self::Str(text) => format!("\"{text}\""),
            Self::Op(op) => match op {
                CompareOp::Eq => "=".to_string(),
                CompareOp::Ne => "!=".to_string(),
                CompareOp::Lt => "<".to_string(),
                CompareOp::Le => "<=".to_string(),
                CompareOp::Gt => ">".to_string(),
                CompareOp::Ge => ">=".to_string(),
            },
            Self::Tilde => "~".to_string(),
            Self::And => "&&".to_string(),
            Self::Or => "||".to_string(),
            Self::Not => "!".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
        }
    }
}

/// Parses a filter expression into a predicate tree.
pub fn parse_filter(source: &str) -> Result<Predicate, FilterParseError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(FilterParseError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let predicate = parser.parse_or()?;
    if let Some((token, position)) = parser.tokens.get(parser.pos) {
        return Err(FilterParseError::UnexpectedToken {
            found: token.describe(),
            position: *position,
        });
    }
    Ok(predicate)
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | ':' | '.' | '-')
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, FilterParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, position));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, position));
                i += 1;
            }
            '~' => {
                tokens.push((Token::Tilde, position));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::And, position));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::Or, position));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push((Token::Op(CompareOp::Ne), position));
                i += 2;
            }
            '!' => {
                tokens.push((Token::Not, position));
                i += 1;
            }
            '=' => {
                tokens.push((Token::Op(CompareOp::Eq), position));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (ch, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push((Token::Op(op), position));
                i += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = ch;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let (_, c) = chars[j];
                    if c == '\\' {
                        if let Some((_, escaped)) = chars.get(j + 1) {
                            text.push(*escaped);
                            j += 2;
                            continue;
                        }
                    }
                    if c == quote {
                        closed = true;
                        break;
                    }
                    text.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(FilterParseError::UnterminatedString { position });
                }
                tokens.push((Token::Str(text), position));
                i = j + 1;
            }
            c if is_word_char(c) => {
                let mut j = i;
                let mut word = String::new();
                while j < chars.len() && is_word_char(chars[j].1) {
                    word.push(chars[j].1);
                    j += 1;
                }
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Word(word),
                };
                tokens.push((token, position));
                i = j;
            }
            other => {
                return Err(FilterParseError::UnexpectedChar {
                    ch: other,
                    position,
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Result<(Token, usize), FilterParseError> {
        let item = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FilterParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FilterParseError> {
        let (token, position) = self.advance()?;
        if &token != expected {
            return Err(FilterParseError::UnexpectedToken {
                found: token.describe(),
                position,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Predicate, FilterParseError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(collapse(items, Predicate::Or))
    }

    fn parse_and(&mut self) -> Result<Predicate, FilterParseError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(collapse(items, Predicate::And))
    }

    fn parse_unary(&mut self) -> Result<Predicate, FilterParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, FilterParseError> {
        let (token, position) = self.advance()?;
        match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Word(word)
                if word.eq_ignore_ascii_case("has") && self.peek() == Some(&Token::LParen) =>
            {
                self.pos += 1;
                let field = self.parse_field()?;
                self.expect(&Token::RParen)?;
                Ok(Predicate::Exists(field))
            }
            Token::Word(field) | Token::Str(field) => self.parse_comparison(field),
            other => Err(FilterParseError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }

    fn parse_field(&mut self) -> Result<String, FilterParseError> {
        match self.advance()? {
            (Token::Word(field), _) | (Token::Str(field), _) => Ok(field),
            (other, position) => Err(FilterParseError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }

    fn parse_comparison(&mut self, field: String) -> Result<Predicate, FilterParseError> {
        let (token, position) = self.advance()?;
        match token {
            Token::Tilde => {
                let pattern = self.parse_field()?;
                let compiled =
                    Pattern::new(&pattern).map_err(|err| FilterParseError::InvalidRegex {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })?;
                Ok(Predicate::Matches {
                    field,
                    pattern: compiled,
                })
            }
            Token::Op(op) => {
                let value = self.parse_field()?;
                if op.is_numeric() && value.trim().parse::<f64>().is_err() {
                    return Err(FilterParseError::ExpectedNumber(value));
                }
                Ok(Predicate::Compare { field, op, value })
            }
            other => Err(FilterParseError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }
}

fn collapse(mut items: Vec<Predicate>, combine: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if items.len() == 1 {
        items.remove(0)
    } else {
        combine(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_binds_tighter_than_or() {
        let predicate = parse_filter("a = 1 || b = 2 && c = 3").unwrap();
        assert_eq!(
            predicate,
            Predicate::Or(vec![
                Predicate::eq("a", "1"),
                Predicate::And(vec![Predicate::eq("b", "2"), Predicate::eq("c", "3")]),
            ])
        );
    }

    #[test]
    fn unterminated_string_is_reported() {
        assert_eq!(
            parse_filter("name = \"open"),
            Err(FilterParseError::UnterminatedString { position: 7 })
        );
    }

    #[test]
    fn numeric_operator_requires_number() {
        assert_eq!(
            parse_filter("number > abc"),
            Err(FilterParseError::ExpectedNumber("abc".to_string()))
        );
    }
}
