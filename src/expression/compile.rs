//! Compilation of expressions into numeric evaluators
//!
//! Symbols are resolved to argument positions once, at compile time; the
//! result is a tree of closures over [`FieldData`] arguments.

use std::fmt;

use tracing::warn;

use crate::error::{BenthosError, BenthosResult};
use crate::expression::ast::{Expr, Func};
use crate::physics::FieldData;

type Node = Box<dyn Fn(&[FieldData]) -> BenthosResult<FieldData>>;

/// Numeric evaluator over an ordered argument list
pub struct CompiledExpr {
    source: String,
    args: Vec<String>,
    unbound: Vec<String>,
    node: Node,
}

impl CompiledExpr {
    /// Compile `expr` with arguments in the order of `args`
    ///
    /// Symbols missing from `args` are logged as a warning; evaluating them
    /// fails with [`BenthosError::UnboundSymbol`].
    pub fn compile(expr: &Expr, args: &[String]) -> Self {
        let unbound: Vec<String> = expr
            .free_symbols()
            .into_iter()
            .filter(|s| !args.contains(s))
            .collect();
        if !unbound.is_empty() {
            warn!(
                "Expression {} has free symbols {:?} outside of its arguments {:?}",
                expr, unbound, args
            );
        }
        Self {
            source: expr.to_string(),
            args: args.to_vec(),
            unbound,
            node: build(expr, args),
        }
    }

    /// Argument names in call order
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Symbols of the expression that are not arguments
    pub fn unbound(&self) -> &[String] {
        &self.unbound
    }

    /// Rendered source expression
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with one value per argument
    pub fn call(&self, values: &[FieldData]) -> BenthosResult<FieldData> {
        if values.len() != self.args.len() {
            return Err(BenthosError::numerical(format!(
                "{} expects {} argument(s), got {}",
                self.source,
                self.args.len(),
                values.len()
            )));
        }
        (self.node)(values)
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .field("args", &self.args)
            .finish()
    }
}

fn binary(a: Node, b: Node, op: fn(f64, f64) -> f64) -> Node {
    Box::new(move |x| a(x)?.zip_with(&b(x)?, op))
}

fn build(expr: &Expr, args: &[String]) -> Node {
    match expr {
        Expr::Num(v) => {
            let v = *v;
            Box::new(move |_| Ok(FieldData::Scalar(v)))
        }
        Expr::Sym(name) => match args.iter().position(|a| a == name) {
            Some(i) => Box::new(move |x| Ok(x[i].clone())),
            None => {
                let symbol = name.clone();
                Box::new(move |_| {
                    Err(BenthosError::UnboundSymbol {
                        symbol: symbol.clone(),
                    })
                })
            }
        },
        Expr::Neg(a) => {
            let a = build(a, args);
            Box::new(move |x| Ok(a(x)?.map(|v| -v)))
        }
        Expr::Add(a, b) => binary(build(a, args), build(b, args), |p, q| p + q),
        Expr::Sub(a, b) => binary(build(a, args), build(b, args), |p, q| p - q),
        Expr::Mul(a, b) => binary(build(a, args), build(b, args), |p, q| p * q),
        Expr::Div(a, b) => binary(build(a, args), build(b, args), |p, q| p / q),
        Expr::Pow(a, b) => binary(build(a, args), build(b, args), f64::powf),
        Expr::Call(func, call_args) => {
            let func: Func = *func;
            let mut nodes: Vec<Node> = call_args.iter().map(|a| build(a, args)).collect();
            if func.arity() == 2 && nodes.len() == 2 {
                let b = nodes.remove(1);
                let a = nodes.remove(0);
                Box::new(move |x| a(x)?.zip_with(&b(x)?, |p, q| func.apply2(p, q)))
            } else {
                let a = nodes.remove(0);
                Box::new(move |x| Ok(a(x)?.map(move |p| func.apply1(p))))
            }
        }
        Expr::Cmp(op, a, b) => {
            let op = *op;
            let a = build(a, args);
            let b = build(b, args);
            Box::new(move |x| a(x)?.zip_with(&b(x)?, |p, q| op.indicator(p, q)))
        }
        Expr::And(a, b) => binary(build(a, args), build(b, args), |p, q| {
            if p != 0.0 && q != 0.0 { 1.0 } else { 0.0 }
        }),
        Expr::Or(a, b) => binary(build(a, args), build(b, args), |p, q| {
            if p != 0.0 || q != 0.0 { 1.0 } else { 0.0 }
        }),
        Expr::Not(a) => {
            let a = build(a, args);
            Box::new(move |x| Ok(a(x)?.map(|p| if p == 0.0 { 1.0 } else { 0.0 })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_formula, Namespace};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scalar_and_cells() {
        let expr = parse_formula("a + b", &Namespace::new()).unwrap();
        let f = CompiledExpr::compile(&expr, &names(&["a", "b"]));
        let out = f
            .call(&[FieldData::uniform(4, 2.0), FieldData::Scalar(3.0)])
            .unwrap();
        assert_eq!(out, FieldData::uniform(4, 5.0));
    }

    #[test]
    fn test_indicator_piece() {
        let expr = parse_formula("k * x * (x > 1)", &Namespace::new()).unwrap();
        let f = CompiledExpr::compile(&expr, &names(&["x", "k"]));
        let out = f
            .call(&[FieldData::from_vec(vec![0.5, 2.0]), FieldData::Scalar(3.0)])
            .unwrap();
        assert_eq!(out, FieldData::from_vec(vec![0.0, 6.0]));
    }

    #[test]
    fn test_unbound_symbol() {
        let expr = parse_formula("a * c", &Namespace::new()).unwrap();
        let f = CompiledExpr::compile(&expr, &names(&["a"]));
        assert_eq!(f.unbound(), &["c".to_string()]);
        let err = f.call(&[FieldData::Scalar(1.0)]).unwrap_err();
        assert!(matches!(err, BenthosError::UnboundSymbol { symbol } if symbol == "c"));
    }

    #[test]
    fn test_argument_count() {
        let expr = parse_formula("a", &Namespace::new()).unwrap();
        let f = CompiledExpr::compile(&expr, &names(&["a"]));
        assert!(f.call(&[]).is_err());
    }

    #[test]
    fn test_builtins_evaluate() {
        let expr = parse_formula("min(exp(x), 2) + abs(-y)", &Namespace::new()).unwrap();
        let f = CompiledExpr::compile(&expr, &names(&["x", "y"]));
        let out = f
            .call(&[FieldData::from_vec(vec![0.0, 5.0]), FieldData::Scalar(1.0)])
            .unwrap();
        assert_eq!(out, FieldData::from_vec(vec![2.0, 3.0]));
    }
}
