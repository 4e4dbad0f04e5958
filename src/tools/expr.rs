//! Arithmetic expression evaluation for the `calculator` tool

use crate::error::{EngineError, EngineResult};

/// Deepest nesting of parentheses, signs and exponents accepted.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
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

fn tokenize(input: &str) -> EngineResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // scientific notation: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Num(value));
                continue;
            }
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' | '×' => tokens.push(Token::Star),
            '/' | '÷' => tokens.push(Token::Slash),
            '%' => tokens.push(Token::Percent),
            '^' => tokens.push(Token::Caret),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            other => return Err(invalid(format!("unexpected character '{}'", other))),
        }
        i += 1;
    }
    Ok(tokens)
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidArguments(message)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> EngineResult<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> EngineResult<f64> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Token::Slash | Token::Percent => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(invalid("division by zero".to_string()));
                    }
                    value = if op == Token::Slash { value / rhs } else { value % rhs };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // every recursive path passes through here
    fn unary(&mut self) -> EngineResult<f64> {
        if self.depth >= MAX_DEPTH {
            return Err(invalid("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := ('-' | '+') unary | power
    fn signed(&mut self) -> EngineResult<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := primary ('^' unary)?   (right associative)
    fn power(&mut self) -> EngineResult<f64> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> EngineResult<f64> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(invalid("missing closing parenthesis".to_string())),
                }
            }
            Some(token) => Err(invalid(format!("unexpected token {:?}", token))),
            None => Err(invalid("unexpected end of expression".to_string())),
        }
    }
}

/// Evaluate an arithmetic expression with `+ - * / % ^`, parentheses and
/// unary signs.
pub fn evaluate_expression(input: &str) -> EngineResult<f64> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid("empty expression".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(invalid(format!(
            "unexpected token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    if !value.is_finite() {
        return Err(invalid("result is not a finite number".to_string()));
    }
    Ok(value)
}

/// Render a result without a trailing `.0` for whole numbers.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(s: &str) -> f64 {
        evaluate_expression(s).unwrap()
    }

    #[test]
    fn test_precedence_and_grouping() {
        assert_eq!(eval("2+2"), 4.0);
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("10 % 4"), 2.0);
        assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval("-2 ^ 2"), -4.0);
        assert_eq!(eval("-(3 - 5)"), 2.0);
        assert_eq!(eval("1.5e2 / 3"), 50.0);
        assert_eq!(eval("6 × 7"), 42.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate_expression("").is_err());
        assert!(evaluate_expression("1 / 0").is_err());
        assert!(evaluate_expression("(1 + 2").is_err());
        assert!(evaluate_expression("1 + ").is_err());
        assert!(evaluate_expression("2 2").is_err());
        assert!(evaluate_expression("rm -rf").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = evaluate_expression(&deep).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let signs = format!("{}1", "-".repeat(50_000));
        assert!(evaluate_expression(&signs).is_err());

        let powers = vec!["1"; 50_000].join("^");
        assert!(evaluate_expression(&powers).is_err());

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval(&shallow), 1.0);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.25), "0.25");
    }
}
