//! Lambda-text front end for filters
//!
//! Accepts the familiar predicate form and builds the same AST the builder
//! API produces:
//!
//! ```text
//! row => row.Id > 123 && (row.Name.Contains(x) || row.Deleted == null)
//! ```
//!
//! Quote and backtick characters are rejected before tokenizing.

use super::{Clock, CompareOp, Expr, FilterParam, Literal, LogicalOp, Method};
use crate::sql::error::{CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Integer(i64),
    Float(f64),
    Arrow,
    Dot,
    Comma,
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    Minus,
    Cmp(CompareOp),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn tokenize(src: &'a str) -> CompileResult<Vec<(usize, Token)>> {
        let mut lexer = Lexer { src, pos: 0 };
        let mut tokens = Vec::new();
        while let Some(tok) = lexer.next_token()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> CompileResult<Option<(usize, Token)>> {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.pos += self.peek_char().map_or(1, char::len_utf8);
        }
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok(None);
        };
        let src = self.src;
        let rest = &src[start..];

        let two = |s: &str| rest.starts_with(s);
        let (token, len) = if two("=>") {
            (Token::Arrow, 2)
        } else if two("&&") {
            (Token::AndAnd, 2)
        } else if two("||") {
            (Token::OrOr, 2)
        } else if two("==") {
            (Token::Cmp(CompareOp::Eq), 2)
        } else if two("!=") {
            (Token::Cmp(CompareOp::NotEq), 2)
        } else if two("<=") {
            (Token::Cmp(CompareOp::LtEq), 2)
        } else if two(">=") {
            (Token::Cmp(CompareOp::GtEq), 2)
        } else {
            match c {
                '<' => (Token::Cmp(CompareOp::Lt), 1),
                '>' => (Token::Cmp(CompareOp::Gt), 1),
                '!' => (Token::Bang, 1),
                '-' => (Token::Minus, 1),
                '.' => (Token::Dot, 1),
                ',' => (Token::Comma, 1),
                '(' => (Token::LParen, 1),
                ')' => (Token::RParen, 1),
                c if c.is_ascii_digit() => return self.number(start).map(Some),
                c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                    let len = rest
                        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                        .unwrap_or(rest.len());
                    let word = &rest[..len];
                    let token = match word {
                        "AndAlso" => Token::AndAnd,
                        "OrElse" => Token::OrOr,
                        _ => Token::Ident(word.to_string()),
                    };
                    (token, len)
                }
                other => return Err(self.error(format!("unexpected character '{}'", other))),
            }
        };
        self.pos += len;
        Ok(Some((start, token)))
    }

    fn number(&mut self, start: usize) -> CompileResult<(usize, Token)> {
        let src = self.src;
        let rest = &src[start..];
        let int_len = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        let after = &rest[int_len..];
        let frac_len = match after.strip_prefix('.') {
            Some(frac) if frac.starts_with(|ch: char| ch.is_ascii_digit()) => {
                1 + frac
                    .find(|ch: char| !ch.is_ascii_digit())
                    .unwrap_or(frac.len())
            }
            _ => 0,
        };
        let text = &rest[..int_len + frac_len];
        self.pos = start + text.len();

        let token = if frac_len > 0 {
            text.parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid number '{}'", text)))?
        } else {
            text.parse()
                .map(Token::Integer)
                .map_err(|_| self.error(format!("integer out of range '{}'", text)))?
        };
        Ok((start, token))
    }
}

/// Deepest allowed nesting of parentheses, negations and call arguments
pub(super) const MAX_NESTING: usize = 64;

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    index: usize,
    end: usize,
    depth: usize,
    row: String,
    params: &'a [FilterParam],
}

/// Parse `row => <boolean expression>`
pub(super) fn parse_lambda(text: &str, params: &[FilterParam]) -> CompileResult<Expr> {
    if let Some(pos) = text.find(|c: char| matches!(c, '\'' | '"' | '`')) {
        return Err(CompileError::UnsafeExpression(format!(
            "quote character at position {}",
            pos
        )));
    }

    let tokens = Lexer::tokenize(text)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: text.len(),
        depth: 0,
        row: String::new(),
        params,
    };

    parser.row = parser.lambda_head()?;
    if parser.params.iter().any(|p| p.name == parser.row) {
        return Err(CompileError::InvalidExpression(format!(
            "parameter '{}' has the same name as the row",
            parser.row
        )));
    }
    let expr = parser.expression()?;
    if parser.index < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.index).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.index += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Parse {
            position: self
                .tokens
                .get(self.index)
                .map(|(p, _)| *p)
                .unwrap_or(self.end),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> CompileResult<()> {
        if self.peek() == Some(&expected) {
            self.index += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn ident(&mut self) -> CompileResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.index += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    /// `row =>` or `(row) =>`
    fn lambda_head(&mut self) -> CompileResult<String> {
        let parenthesized = self.peek() == Some(&Token::LParen);
        if parenthesized {
            self.index += 1;
        }
        let row = self.ident()?;
        if parenthesized {
            self.expect(Token::RParen, "')'")?;
        }
        self.expect(Token::Arrow, "'=>'")?;
        Ok(row)
    }

    /// Run `inner` one nesting level deeper
    fn nested<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> CompileResult<Expr> {
        self.nested(Self::disjunction)
    }

    fn disjunction(&mut self) -> CompileResult<Expr> {
        let mut operands = vec![self.conjunction()?];
        while self.peek() == Some(&Token::OrOr) {
            self.index += 1;
            operands.push(self.conjunction()?);
        }
        Ok(collapse(LogicalOp::Or, operands))
    }

    fn conjunction(&mut self) -> CompileResult<Expr> {
        let mut operands = vec![self.comparison()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.index += 1;
            operands.push(self.comparison()?);
        }
        Ok(collapse(LogicalOp::And, operands))
    }

    fn comparison(&mut self) -> CompileResult<Expr> {
        let left = self.unary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.index += 1;
            let right = self.unary()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn unary(&mut self) -> CompileResult<Expr> {
        match self.peek() {
            Some(Token::Bang) => {
                self.index += 1;
                Ok(Expr::Not(Box::new(self.nested(Self::unary)?)))
            }
            Some(Token::Minus) => {
                self.index += 1;
                match self.advance() {
                    Some(Token::Integer(i)) => Ok(Expr::Literal(Literal::Integer(-i))),
                    Some(Token::Float(f)) => Ok(Expr::Literal(Literal::Float(-f))),
                    _ => Err(self.error("'-' is only supported before a number")),
                }
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.index += 1;
            let member = self.ident()?;

            if self.peek() == Some(&Token::LParen) {
                self.index += 1;
                expr = self.method_call(expr, &member)?;
                continue;
            }

            let method = match member.as_str() {
                "HasValue" => Method::HasValue,
                "Value" => Method::Value,
                other => return Err(self.error(format!("unsupported member '{}'", other))),
            };
            expr = Expr::Call {
                receiver: Box::new(expr),
                method,
                args: Vec::new(),
            };
        }
        Ok(expr)
    }

    /// Parse arguments after `(` of `receiver.name(`
    fn method_call(&mut self, receiver: Expr, name: &str) -> CompileResult<Expr> {
        let method = match name {
            "Contains" => Method::Contains,
            "StartsWith" => Method::StartsWith,
            "EndsWith" => Method::EndsWith,
            "Equals" => Method::Equals { ignore_case: false },
            "ToUpper" | "ToUpperInvariant" => Method::ToUpper,
            "ToLower" | "ToLowerInvariant" => Method::ToLower,
            other => return Err(self.error(format!("unsupported method '{}'", other))),
        };

        let mut args = Vec::new();
        let mut method = method;
        if self.peek() != Some(&Token::RParen) {
            args.push(self.expression()?);
            if matches!(method, Method::Equals { .. }) && self.peek() == Some(&Token::Comma) {
                self.index += 1;
                method = Method::Equals {
                    ignore_case: self.comparer()?,
                };
            }
        }
        self.expect(Token::RParen, "')'")?;

        Ok(Expr::Call {
            receiver: Box::new(receiver),
            method,
            args,
        })
    }

    /// `StringComparison.OrdinalIgnoreCase` and friends; true when case-insensitive
    fn comparer(&mut self) -> CompileResult<bool> {
        let owner = self.ident()?;
        if owner != "StringComparison" && owner != "StringComparer" {
            return Err(self.error(format!("expected a string comparer, found '{}'", owner)));
        }
        self.expect(Token::Dot, "'.'")?;
        let kind = self.ident()?;
        Ok(kind.ends_with("IgnoreCase"))
    }

    fn primary(&mut self) -> CompileResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected an operand"));
        };
        match token {
            Token::LParen => {
                self.index += 1;
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Integer(i) => {
                self.index += 1;
                Ok(Expr::Literal(Literal::Integer(i)))
            }
            Token::Float(f) => {
                self.index += 1;
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Token::Ident(name) => {
                self.index += 1;
                self.named(name)
            }
            _ => Err(self.error("expected an operand")),
        }
    }

    fn named(&mut self, name: String) -> CompileResult<Expr> {
        match name.as_str() {
            "null" => return Ok(Expr::Literal(Literal::Null)),
            "true" => return Ok(Expr::Literal(Literal::Boolean(true))),
            "false" => return Ok(Expr::Literal(Literal::Boolean(false))),
            "DateTime" | "DateTimeOffset" => {
                self.expect(Token::Dot, "'.'")?;
                return match self.ident()?.as_str() {
                    "Now" => Ok(Expr::Now(Clock::Local)),
                    "UtcNow" => Ok(Expr::Now(Clock::Utc)),
                    other => Err(self.error(format!("unsupported clock '{}'", other))),
                };
            }
            _ => {}
        }

        if name == self.row {
            self.expect(Token::Dot, "'.' after row parameter")?;
            let property = self.ident()?;
            return Ok(Expr::Field(property));
        }

        if self.params.iter().any(|p| p.name == name) {
            Ok(Expr::Param(name))
        } else {
            Err(CompileError::UnknownParameter(name))
        }
    }
}

fn collapse(op: LogicalOp, mut operands: Vec<Expr>) -> Expr {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        Expr::Logical { op, operands }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::predicate::{field, param};

    fn params(names: &[&str]) -> Vec<FilterParam> {
        names.iter().map(|n| FilterParam::of::<String>(*n)).collect()
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse_lambda("row => row.Id > 123", &[]).unwrap();
        assert_eq!(expr, field("Id").gt(123));
    }

    #[test]
    fn test_parse_parenthesized_head_and_precedence() {
        let expr = parse_lambda("(u) => u.A == 1 || u.B == 2 && u.C != null", &[]).unwrap();
        let expected = field("A")
            .equal(1)
            .or(field("B").equal(2).and(field("C").not_equal(Expr::null())));
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_methods() {
        let p = params(&["x"]);
        let expr = parse_lambda("row => row.Name.Contains(x)", &p).unwrap();
        assert_eq!(expr, field("Name").contains(param("x")));

        let expr = parse_lambda(
            "row => row.Name.Equals(x, StringComparison.OrdinalIgnoreCase)",
            &p,
        )
        .unwrap();
        assert_eq!(expr, field("Name").equals_ignore_case(param("x")));

        let expr = parse_lambda("row => row.Name.ToLower().StartsWith(x)", &p).unwrap();
        assert_eq!(expr, field("Name").to_lower().starts_with(param("x")));
    }

    #[test]
    fn test_parse_nullable_and_clock() {
        let expr = parse_lambda(
            "row => row.Expires.HasValue AndAlso row.Expires.Value < DateTime.UtcNow",
            &[],
        )
        .unwrap();
        let expected = field("Expires")
            .has_value()
            .and(field("Expires").value().lt(Expr::utc_now()));
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_negation_and_numbers() {
        let expr = parse_lambda("row => !(row.Score >= -1.5)", &[]).unwrap();
        assert_eq!(expr, field("Score").ge(-1.5).negate());
    }

    #[test]
    fn test_quotes_rejected() {
        for text in [
            "row => row.Name == 'bob'",
            "row => row.Name == \"bob\"",
            "row => row.`Name` == x",
        ] {
            assert!(matches!(
                parse_lambda(text, &params(&["x"])),
                Err(CompileError::UnsafeExpression(_))
            ));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_lambda("row.Id > 1", &[]),
            Err(CompileError::Parse { .. })
        ));
        assert!(matches!(
            parse_lambda("row => row.Id >", &[]),
            Err(CompileError::Parse { .. })
        ));
        assert!(matches!(
            parse_lambda("row => row.Name.Trim()", &[]),
            Err(CompileError::Parse { .. })
        ));
        assert!(matches!(
            parse_lambda("row => row.Id == y", &[]),
            Err(CompileError::UnknownParameter(_))
        ));
        assert!(matches!(
            parse_lambda("row => row.Id == 1 )", &[]),
            Err(CompileError::Parse { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let wrap = |depth: usize| {
            format!(
                "row => {}row.Id > 1{}",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };
        assert_eq!(parse_lambda(&wrap(10), &[]).unwrap(), field("Id").gt(1));

        let err = parse_lambda(&wrap(5000), &[]).unwrap_err();
        assert!(
            matches!(err, CompileError::Parse { ref message, .. } if message.contains("nested"))
        );

        let negations = format!("row => {}row.Active", "!".repeat(5000));
        assert!(matches!(
            parse_lambda(&negations, &[]),
            Err(CompileError::Parse { .. })
        ));
    }

    #[test]
    fn test_dollar_names_and_row_collision() {
        let p = params(&["$min"]);
        let expr = parse_lambda("row => row.Name == $min", &p).unwrap();
        assert_eq!(expr, field("Name").equal(param("$min")));

        let p = params(&["row"]);
        assert!(matches!(
            parse_lambda("row => row.Name == row", &p),
            Err(CompileError::InvalidExpression(_))
        ));
        // Other heads leave the same parameter usable
        let expr = parse_lambda("r => r.Name == row", &p).unwrap();
        assert_eq!(expr, field("Name").equal(param("row")));
    }
}
