//! Integer expression evaluation.
//!
//! Expressions are evaluated while they are parsed, by precedence climbing over a token list.
//! Operands are integer literals or variables whose values parse as integers.

use std::fmt;

use debugger::Variables;

use crate::error::EvalError;

/// Deepest parenthesis nesting accepted in an expression
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Ident(name) => write!(f, "identifier {name:?}"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn apply(self, left: i64, right: i64) -> Result<i64, EvalError> {
        let result = match self {
            BinaryOp::Add => left.checked_add(right),
            BinaryOp::Sub => left.checked_sub(right),
            BinaryOp::Mul => left.checked_mul(right),
            BinaryOp::Div | BinaryOp::Rem if right == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div => left.checked_div(right),
            BinaryOp::Rem => left.checked_rem(right),
        };
        result.ok_or(EvalError::Overflow)
    }
}

/// Binary operator precedence, higher binds tighter. All operators are left associative.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::Plus => Some((10, BinaryOp::Add)),
        Token::Minus => Some((10, BinaryOp::Sub)),
        Token::Star => Some((20, BinaryOp::Mul)),
        Token::Slash => Some((20, BinaryOp::Div)),
        Token::Percent => Some((20, BinaryOp::Rem)),
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() => {
                let mut end = offset + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|(_, d)| d.is_ascii_digit()) {
                    end = i + d.len_utf8();
                }
                let literal = &input[offset..end];
                let value = literal
                    .parse()
                    .map_err(|_| EvalError::InvalidNumber(literal.to_string()))?;
                Token::Number(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = offset + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|(_, d)| d.is_alphanumeric() || *d == '_')
                {
                    end = i + d.len_utf8();
                }
                Token::Ident(input[offset..end].to_string())
            }
            character => {
                return Err(EvalError::UnexpectedCharacter { character, offset });
            }
        };
        tokens.push((offset, token));
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    position: usize,
    depth: usize,
    variables: &'a Variables,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expression(&mut self, min_prec: u8) -> Result<i64, EvalError> {
        let mut left = self.prefix()?;

        while let Some((_, token)) = self.peek() {
            let Some((prec, op)) = binary_op_info(token) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();

            let right = self.expression(prec + 1)?;
            left = op.apply(left, right)?;
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<i64, EvalError> {
        let mut negations = 0usize;
        while let Some((_, Token::Minus)) = self.peek() {
            self.advance();
            negations += 1;
        }

        let mut value = self.operand()?;
        for _ in 0..negations {
            value = value.checked_neg().ok_or(EvalError::Overflow)?;
        }
        Ok(value)
    }

    fn operand(&mut self) -> Result<i64, EvalError> {
        match self.advance() {
            None => Err(EvalError::UnexpectedEnd),
            Some((_, Token::Number(n))) => Ok(n),
            Some((_, Token::Ident(name))) => self.lookup(name),
            Some((offset, Token::LParen)) => {
                if self.depth == MAX_DEPTH {
                    return Err(EvalError::TooDeep { offset });
                }
                self.depth += 1;
                let value = self.expression(0)?;
                self.depth -= 1;
                match self.advance() {
                    Some((_, Token::RParen)) => Ok(value),
                    Some((offset, found)) => Err(EvalError::UnexpectedToken {
                        found: found.to_string(),
                        offset,
                    }),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some((offset, found)) => Err(EvalError::UnexpectedToken {
                found: found.to_string(),
                offset,
            }),
        }
    }

    fn lookup(&self, name: String) -> Result<i64, EvalError> {
        let value = self
            .variables
            .get(&name)
            .ok_or_else(|| EvalError::UnknownVariable(name.clone()))?;
        value.trim().parse().map_err(|_| EvalError::NotANumber {
            value: value.clone(),
            name,
        })
    }
}

/// Evaluate an integer expression, resolving identifiers against `variables`
pub fn evaluate(expression: &str, variables: &Variables) -> Result<i64, EvalError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
        variables,
    };
    let value = parser.expression(0)?;
    if let Some((offset, found)) = parser.advance() {
        return Err(EvalError::UnexpectedToken {
            found: found.to_string(),
            offset,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use debugger::Variables;

    use super::{MAX_DEPTH, evaluate};
    use crate::error::EvalError;

    fn eval(expression: &str) -> Result<i64, EvalError> {
        let mut variables = Variables::new();
        variables.insert("x".to_string(), "6".to_string());
        variables.insert("name".to_string(), "world".to_string());
        evaluate(expression, &variables)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1+1"), Ok(2));
        assert_eq!(eval("2 + 3 * 4"), Ok(14));
        assert_eq!(eval("(2 + 3) * 4"), Ok(20));
        assert_eq!(eval("10 - 4 - 3"), Ok(3));
        assert_eq!(eval("100 / 10 / 5"), Ok(2));
        assert_eq!(eval("17 % 5 * 2"), Ok(4));
    }

    #[test]
    fn unary_minus() {
        assert_eq!(eval("-3"), Ok(-3));
        assert_eq!(eval("--3"), Ok(3));
        assert_eq!(eval("2 * -x"), Ok(-12));
        assert_eq!(eval("-(1 + 2)"), Ok(-3));
    }

    #[test]
    fn variables() {
        assert_eq!(eval("x * 7"), Ok(42));
        assert_eq!(eval("y"), Err(EvalError::UnknownVariable("y".to_string())));
        assert_eq!(
            eval("name + 1"),
            Err(EvalError::NotANumber {
                name: "name".to_string(),
                value: "world".to_string()
            })
        );
    }

    #[test]
    fn arithmetic_errors() {
        assert_eq!(eval("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("1 % (x - 6)"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("9223372036854775807 + 1"), Err(EvalError::Overflow));
        assert!(matches!(
            eval("99999999999999999999"),
            Err(EvalError::InvalidNumber(_))
        ));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(eval(""), Err(EvalError::Empty));
        assert_eq!(eval("   "), Err(EvalError::Empty));
        assert_eq!(eval("1 +"), Err(EvalError::UnexpectedEnd));
        assert_eq!(eval("(1 + 2"), Err(EvalError::UnexpectedEnd));
        assert!(matches!(
            eval("1 2"),
            Err(EvalError::UnexpectedToken { offset: 2, .. })
        ));
        assert!(matches!(
            eval("* 2"),
            Err(EvalError::UnexpectedToken { offset: 0, .. })
        ));
        assert_eq!(
            eval("1 $ 2"),
            Err(EvalError::UnexpectedCharacter {
                character: '$',
                offset: 2
            })
        );
    }

    #[test]
    fn nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(eval(&nested(MAX_DEPTH)), Ok(1));
        assert_eq!(
            eval(&nested(MAX_DEPTH + 1)),
            Err(EvalError::TooDeep { offset: MAX_DEPTH })
        );
        assert!(matches!(
            eval(&"(".repeat(200_000)),
            Err(EvalError::TooDeep { .. })
        ));
    }

    #[test]
    fn long_negation_chains() {
        assert_eq!(eval(&format!("{}7", "-".repeat(200_000))), Ok(7));
        assert_eq!(eval(&format!("{}7", "-".repeat(200_001))), Ok(-7));
        assert_eq!(eval(&format!("{}(x)", "-".repeat(5_001))), Ok(-6));
    }
}
