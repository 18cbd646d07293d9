//! Arithmetic expression evaluator for the `calculate` tool.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    = term (("+" | "-") term)*
//! term    = unary (("*" | "/" | "%") unary)*
//! unary   = ("-" | "+") unary | power
//! power   = primary (("^" | "**") unary)?
//! primary = number | "(" expr ")"
//! ```
//!
//! `^` is right-associative and binds tighter than unary minus, so
//! `-2^2` is `-4`.

use thiserror::Error;

/// Nesting limit for parentheses and unary operators.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected '{token}' at position {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,

    #[error("expression nested too deeply")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn symbol(&self) -> String {
        match self {
            Token::Num(n) => n.to_string(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Caret => "^".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

/// Evaluate `input` to a finite number.
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some((token, pos)) = parser.peek_with_pos() {
        return Err(EvalError::UnexpectedToken {
            token: token.symbol(),
            pos,
        });
    }
    if !value.is_finite() {
        return Err(EvalError::NonFinite);
    }
    Ok(value)
}

/// Format a result the way a calculator would: no trailing `.0`, and
/// `-0` shown as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::InvalidNumber { text: text.clone() })?;
                tokens.push((Token::Num(value), start));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push((Token::Caret, i));
                i += 2;
                continue;
            }
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(EvalError::UnexpectedChar { ch: other, pos: i }),
        };
        tokens.push((token, i));
        i += 1;
    }

    Ok(tokens)
}

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_with_pos(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.advance();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                self.enter()?;
                let value = -self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Plus) => {
                self.advance();
                self.enter()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.advance();
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        let pos = self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or_default();
        match self.advance() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                self.enter()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(EvalError::UnexpectedToken {
                        token: other.symbol(),
                        pos: self.tokens.get(self.pos - 1).map(|(_, p)| *p).unwrap_or(pos),
                    }),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(other) => Err(EvalError::UnexpectedToken {
                token: other.symbol(),
                pos,
            }),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_arithmetic() {
        assert_eq!(evaluate("15 + 25").unwrap(), 40.0);
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("7 / 2").unwrap(), 3.5);
        assert_eq!(evaluate("10 % 4").unwrap(), 2.0);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
    }

    #[test]
    fn test_power_and_unary() {
        assert_eq!(evaluate("2 ^ 10").unwrap(), 1024.0);
        assert_eq!(evaluate("2 ** 3").unwrap(), 8.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ -1").unwrap(), 0.5);
        assert_eq!(evaluate("--3").unwrap(), 3.0);
        assert_eq!(evaluate("-(1 + 2) * 3").unwrap(), -9.0);
    }

    #[test]
    fn test_decimals() {
        assert_eq!(evaluate("1.5 * 4").unwrap(), 6.0);
        assert_eq!(evaluate(".5 + .25").unwrap(), 0.75);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("").unwrap_err(), EvalError::Empty);
        assert_eq!(evaluate("   ").unwrap_err(), EvalError::Empty);
        assert_eq!(evaluate("1 / 0").unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(evaluate("5 % 0").unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(evaluate("(1 + 2").unwrap_err(), EvalError::UnexpectedEnd);
        assert_eq!(evaluate("1 +").unwrap_err(), EvalError::UnexpectedEnd);
        assert!(matches!(evaluate("1.2.3").unwrap_err(), EvalError::InvalidNumber { .. }));
        assert!(matches!(
            evaluate("1 2").unwrap_err(),
            EvalError::UnexpectedToken { pos: 2, .. }
        ));
        assert!(matches!(
            evaluate("2 * )").unwrap_err(),
            EvalError::UnexpectedToken { pos: 4, .. }
        ));
    }

    #[test]
    fn test_no_code_execution() {
        assert_eq!(
            evaluate("process.exit(1)").unwrap_err(),
            EvalError::UnexpectedChar { ch: 'p', pos: 0 }
        );
        assert!(matches!(evaluate("1; rm -rf /").unwrap_err(), EvalError::UnexpectedChar { ch: ';', .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(evaluate("10 ^ 400").unwrap_err(), EvalError::NonFinite);
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&deep).unwrap_err(), EvalError::TooDeep);
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(evaluate(&ok).unwrap(), 1.0);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(40.0), "40");
        assert_eq!(format_number(3.5), "3.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-9.0), "-9");
    }
}
