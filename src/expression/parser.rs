//! Formula parser
//!
//! Recursive descent over the grammar
//!
//! ```text
//! expr   := or
//! or     := and ('|' and)*
//! and    := not ('&' not)*
//! not    := '~' not | cmp
//! cmp    := sum (('<' | '<=' | '>' | '>=' | '==' | '!=') sum)?
//! sum    := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('-' | '+') unary | power
//! power  := atom (('**' | '^') unary)?
//! atom   := number | name | name '(' args ')' | '(' expr ')'
//! ```
//!
//! Function calls resolve first to builtins, then to formulas of the
//! [`Namespace`], which are expanded in place by substituting their
//! arguments.

use std::collections::HashMap;

use crate::error::{BenthosError, BenthosResult};
use crate::expression::ast::{CmpOp, Expr, Func};
use crate::expression::Namespace;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
    Comma,
    Cmp(CmpOp),
    And,
    Or,
    Not,
}

fn tokenize(text: &str) -> BenthosResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let fail = |message: String| BenthosError::parse(text, message);

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| fail(format!("invalid number {:?}", literal)))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if next == Some('*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let op = match (c, next) {
                    ('<', Some('=')) => Some((CmpOp::Le, 2)),
                    ('>', Some('=')) => Some((CmpOp::Ge, 2)),
                    ('=', Some('=')) => Some((CmpOp::Eq, 2)),
                    ('!', Some('=')) => Some((CmpOp::Ne, 2)),
                    ('<', _) => Some((CmpOp::Lt, 1)),
                    ('>', _) => Some((CmpOp::Gt, 1)),
                    _ => None,
                };
                let (op, width) = op.ok_or_else(|| fail(format!("unexpected character {:?}", c)))?;
                tokens.push(Token::Cmp(op));
                i += width;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '~' => {
                tokens.push(Token::Not);
                i += 1;
            }
            other => return Err(fail(format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    namespace: &'a Namespace,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn fail(&self, message: impl Into<String>) -> BenthosError {
        BenthosError::parse(self.text, message)
    }

    fn expect(&mut self, token: &Token, what: &str) -> BenthosResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.fail(format!("expected {}", what)))
        }
    }

    fn or(&mut self) -> BenthosResult<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            lhs = Expr::or(lhs, self.and()?);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> BenthosResult<Expr> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            lhs = Expr::and(lhs, self.not()?);
        }
        Ok(lhs)
    }

    fn not(&mut self) -> BenthosResult<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::not(self.not()?));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> BenthosResult<Expr> {
        let lhs = self.sum()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.sum()?;
            return Ok(Expr::cmp(op, lhs, rhs));
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> BenthosResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                lhs = Expr::add(lhs, self.term()?);
            } else if self.eat(&Token::Minus) {
                lhs = Expr::sub(lhs, self.term()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn term(&mut self) -> BenthosResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                lhs = Expr::mul(lhs, self.unary()?);
            } else if self.eat(&Token::Slash) {
                lhs = Expr::div(lhs, self.unary()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> BenthosResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::neg(self.unary()?));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> BenthosResult<Expr> {
        let base = self.atom()?;
        if self.eat(&Token::Pow) {
            let exponent = self.unary()?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> BenthosResult<Expr> {
        match self.advance() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    self.resolve_call(&name, args)
                } else {
                    Ok(Expr::Sym(name))
                }
            }
            Some(token) => Err(self.fail(format!("unexpected token {:?}", token))),
            None => Err(self.fail("unexpected end of formula")),
        }
    }

    fn arguments(&mut self) -> BenthosResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            return Ok(args);
        }
    }

    fn resolve_call(&self, name: &str, args: Vec<Expr>) -> BenthosResult<Expr> {
        if let Some(func) = Func::from_name(name) {
            if args.len() != func.arity() {
                return Err(self.fail(format!(
                    "{} takes {} argument(s), got {}",
                    name,
                    func.arity(),
                    args.len()
                )));
            }
            return Ok(Expr::call(func, args));
        }
        let formula = self
            .namespace
            .get(name)
            .ok_or_else(|| self.fail(format!("unknown function {:?}", name)))?;
        if args.len() != formula.params.len() {
            return Err(self.fail(format!(
                "formula {} takes {} argument(s), got {}",
                name,
                formula.params.len(),
                args.len()
            )));
        }
        let bindings: HashMap<String, Expr> = formula.params.iter().cloned().zip(args).collect();
        Ok(formula.body.substitute(&bindings))
    }
}

/// Parse `text` into an expression, resolving calls through `namespace`
pub fn parse_formula(text: &str, namespace: &Namespace) -> BenthosResult<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(BenthosError::parse(text, "empty formula"));
    }
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
        namespace,
    };
    let expr = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.fail(format!(
            "unexpected token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> BenthosResult<Expr> {
        parse_formula(text, &Namespace::new())
    }

    #[test]
    fn test_precedence() {
        let e = parse("a + b * c ** 2").unwrap();
        assert_eq!(e.to_string(), "a + b*c**2");

        let neg = parse("-x**2").unwrap();
        assert_eq!(neg, Expr::neg(Expr::pow(Expr::sym("x"), Expr::Num(2.0))));

        let right = parse("2 ** 3 ** 2").unwrap();
        assert_eq!(right, Expr::Num(512.0));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("1e-3").unwrap(), Expr::Num(1e-3));
        assert_eq!(parse("2.5E2").unwrap(), Expr::Num(250.0));
        // the exponent marker needs digits, so `e` starts a new identifier
        assert!(parse("2e").is_err());
    }

    #[test]
    fn test_conditions() {
        let e = parse("(x < Kmax) & ~(y >= 1)").unwrap();
        assert!(matches!(e, Expr::And(..)));
        assert!(e.depends_on("Kmax"));
    }

    #[test]
    fn test_builtins() {
        let e = parse("exp(-k * z) + max(a, 0)").unwrap();
        assert_eq!(e.free_symbols().len(), 3);
        assert!(parse("max(a)").is_err());
    }

    #[test]
    fn test_invalid_syntax() {
        for text in ["a +", "(a", "a b", "2 **", "", "a $ b", "foo(1)", "a = b"] {
            assert!(
                matches!(parse(text), Err(BenthosError::Parse { .. })),
                "{:?} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_namespace_formula_is_inlined() {
        let mut ns = Namespace::new();
        ns.define(
            "inhibition_response",
            &["x".to_string(), "Kmax".to_string(), "Khalf".to_string()],
            "(Kmax - x) / (2*Kmax - Khalf - x) * (x < Kmax)",
        )
        .unwrap();
        let e = parse_formula("inhibition_response(oxy, 0.8, 0.7)", &ns).unwrap();
        assert!(e.depends_on("oxy"));
        assert!(!e.depends_on("x"));
        assert!(!e.depends_on("Kmax"));

        assert!(parse_formula("inhibition_response(oxy)", &ns).is_err());
    }
}
