//! Symbolic formulas
//!
//! Formulas of processes are written as text and turned into [`Expr`] trees
//! by [`parse_formula`]. A [`Namespace`] holds user-defined functions (from
//! the `formulae` section of a model definition) that the parser inlines.
//! It is passed to every parse explicitly, so two models never share
//! definitions.
//!
//! An [`Expression`] is a base formula plus optional piecewise terms; its
//! [`value`](Expression::value) is `base · Σ(piece · condition)`, and
//! [`CompiledExpr`] turns any tree into a numeric evaluator.
//!
//! ```rust
//! use microbenthos_rs::expression::{CompiledExpr, Expression, FormulaDef, Namespace};
//! use microbenthos_rs::physics::FieldData;
//!
//! let mut ns = Namespace::new();
//! ns.define("sat", &["x".to_string(), "k".to_string()], "x / (x + k)").unwrap();
//!
//! let expr = Expression::parse(&FormulaDef::from("vmax * sat(oxy, km)"), &ns).unwrap();
//! let args: Vec<String> = ["oxy", "vmax", "km"].iter().map(|s| s.to_string()).collect();
//! let f = CompiledExpr::compile(&expr.value(), &args);
//!
//! let out = f
//!     .call(&[FieldData::Scalar(1.0), FieldData::Scalar(2.0), FieldData::Scalar(1.0)])
//!     .unwrap();
//! assert_eq!(out, FieldData::Scalar(1.0));
//! ```

pub mod ast;
pub mod compile;
pub mod parser;

pub use ast::{CmpOp, Expr, Func};
pub use compile::CompiledExpr;
pub use parser::parse_formula;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenthosError, BenthosResult};

// =================================================================================================
// Namespace
// =================================================================================================

/// A user-defined function: parameter names and body
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    /// Positional parameters
    pub params: Vec<String>,
    /// Body in terms of the parameters
    pub body: Expr,
}

/// User-defined functions available to the parser
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    formulas: BTreeMap<String, Formula>,
}

impl Namespace {
    /// Empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name(vars...) = expr`
    ///
    /// The body may use functions defined earlier in this namespace.
    pub fn define(&mut self, name: &str, vars: &[String], expr: &str) -> BenthosResult<()> {
        if self.formulas.contains_key(name) {
            return Err(BenthosError::duplicate(name, "formulae"));
        }
        if Func::from_name(name).is_some() {
            return Err(BenthosError::config(
                format!("formula {}", name),
                "name shadows a builtin function",
            ));
        }
        let unique: BTreeSet<&String> = vars.iter().collect();
        if unique.len() != vars.len() {
            return Err(BenthosError::config(
                format!("formula {}", name),
                format!("repeated parameter names in {:?}", vars),
            ));
        }

        let body = parse_formula(expr, self)?;
        let extra: Vec<String> = body
            .free_symbols()
            .into_iter()
            .filter(|s| !vars.contains(s))
            .collect();
        if !extra.is_empty() {
            return Err(BenthosError::config(
                format!("formula {}", name),
                format!("symbols {:?} are not among its vars {:?}", extra, vars),
            ));
        }

        debug!("Adding to namespace {:?}: {}", name, body);
        self.formulas.insert(
            name.to_string(),
            Formula {
                params: vars.to_vec(),
                body,
            },
        );
        Ok(())
    }

    /// Look up a defined function
    pub fn get(&self, name: &str) -> Option<&Formula> {
        self.formulas.get(name)
    }

    /// Whether `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.formulas.contains_key(name)
    }

    /// Defined names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulas.keys().map(String::as_str)
    }
}

// =================================================================================================
// Formula definitions
// =================================================================================================

/// One piecewise term of a formula definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceDef {
    /// Term expression
    pub expr: String,
    /// Condition under which the term is active
    #[serde(rename = "where")]
    pub condition: String,
}

/// A formula as written in a model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormulaDef {
    /// Plain formula text
    Text(String),
    /// Base formula with piecewise terms
    Piecewise {
        /// Common factor, `1` when omitted
        #[serde(default)]
        base: Option<String>,
        /// Terms summed under their conditions
        #[serde(default)]
        pieces: Vec<PieceDef>,
    },
}

impl From<&str> for FormulaDef {
    fn from(text: &str) -> Self {
        FormulaDef::Text(text.to_string())
    }
}

// =================================================================================================
// Expression
// =================================================================================================

/// A term active where its condition is non-zero
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    /// Term expression
    pub expr: Expr,
    /// Indicator condition
    pub condition: Expr,
}

/// Base formula with optional piecewise terms
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    base: Expr,
    pieces: Vec<Piece>,
}

impl Expression {
    /// Expression without pieces
    pub fn new(base: Expr) -> Self {
        Self {
            base,
            pieces: Vec::new(),
        }
    }

    /// Parse a formula definition against `namespace`
    pub fn parse(def: &FormulaDef, namespace: &Namespace) -> BenthosResult<Self> {
        debug!("Parsing formula: {:?}", def);
        match def {
            FormulaDef::Text(text) => Ok(Self::new(parse_formula(text, namespace)?)),
            FormulaDef::Piecewise { base, pieces } => {
                let base = match base {
                    Some(text) => parse_formula(text, namespace)?,
                    None => Expr::Num(1.0),
                };
                let mut expression = Self::new(base);
                for piece in pieces {
                    expression.add_piece(
                        parse_formula(&piece.expr, namespace)?,
                        parse_formula(&piece.condition, namespace)?,
                    );
                }
                Ok(expression)
            }
        }
    }

    /// Add a term active where `condition` holds
    pub fn add_piece(&mut self, expr: Expr, condition: Expr) {
        debug!("Adding term {} for condition {}", expr, condition);
        self.pieces.push(Piece { expr, condition });
    }

    /// Base formula
    pub fn base(&self) -> &Expr {
        &self.base
    }

    /// Piecewise terms in insertion order
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// The combined formula `base · Σ(piece · condition)`
    pub fn value(&self) -> Expr {
        match self.piece_sum() {
            Some(sum) => Expr::mul(self.base.clone(), sum),
            None => self.base.clone(),
        }
    }

    fn piece_sum(&self) -> Option<Expr> {
        self.pieces
            .iter()
            .map(|p| Expr::mul(p.expr.clone(), p.condition.clone()))
            .reduce(Expr::add)
    }

    /// Derivative with respect to `symbol`; conditions are held constant
    pub fn derivative(&self, symbol: &str) -> Expr {
        if self.pieces.is_empty() {
            return self.base.derivative(symbol);
        }
        self.pieces
            .iter()
            .map(|p| {
                Expr::mul(
                    Expr::mul(self.base.clone(), p.expr.clone()).derivative(symbol),
                    p.condition.clone(),
                )
            })
            .reduce(Expr::add)
            .unwrap_or(Expr::Num(0.0))
    }

    /// Symbols of the combined formula
    pub fn free_symbols(&self) -> BTreeSet<String> {
        self.value().free_symbols()
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::FieldData;

    fn eval(expr: &Expr, names: &[&str], values: &[f64]) -> f64 {
        let args: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let vals: Vec<FieldData> = values.iter().map(|v| FieldData::Scalar(*v)).collect();
        CompiledExpr::compile(expr, &args)
            .call(&vals)
            .unwrap()
            .try_as_scalar()
            .unwrap()
    }

    #[test]
    fn test_namespace_duplicate_and_builtin() {
        let mut ns = Namespace::new();
        ns.define("f", &["x".to_string()], "2*x").unwrap();
        assert!(matches!(
            ns.define("f", &["x".to_string()], "x"),
            Err(BenthosError::DuplicateName { .. })
        ));
        assert!(ns.define("exp", &["x".to_string()], "x").is_err());
        assert!(ns.define("g", &["x".to_string(), "x".to_string()], "x").is_err());
        assert!(ns.define("h", &["x".to_string()], "x + y").is_err());
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["f"]);
    }

    #[test]
    fn test_formula_uses_earlier_formula() {
        let mut ns = Namespace::new();
        ns.define("sq", &["x".to_string()], "x*x").unwrap();
        ns.define("quad", &["x".to_string()], "sq(sq(x))").unwrap();
        let expr = parse_formula("quad(a)", &ns).unwrap();
        assert_eq!(eval(&expr, &["a"], &[2.0]), 16.0);
    }

    #[test]
    fn test_piecewise_value() {
        let def: FormulaDef = serde_yaml::from_str(
            "base: k\npieces:\n  - expr: x\n    where: x > 1\n  - expr: 2*x\n    where: x <= 1\n",
        )
        .unwrap();
        let e = Expression::parse(&def, &Namespace::new()).unwrap();
        assert_eq!(e.pieces().len(), 2);
        let value = e.value();
        assert_eq!(eval(&value, &["k", "x"], &[3.0, 2.0]), 6.0);
        assert_eq!(eval(&value, &["k", "x"], &[3.0, 0.5]), 3.0);
    }

    #[test]
    fn test_piecewise_derivative() {
        let def: FormulaDef =
            serde_yaml::from_str("base: k\npieces:\n  - expr: x**2\n    where: x > 1\n").unwrap();
        let e = Expression::parse(&def, &Namespace::new()).unwrap();
        let d = e.derivative("x");
        assert_eq!(eval(&d, &["k", "x"], &[2.0, 3.0]), 12.0);
        assert_eq!(eval(&d, &["k", "x"], &[2.0, 0.5]), 0.0);
    }

    #[test]
    fn test_missing_base_defaults_to_one() {
        let def: FormulaDef =
            serde_yaml::from_str("pieces:\n  - expr: x\n    where: x > 0\n").unwrap();
        let e = Expression::parse(&def, &Namespace::new()).unwrap();
        assert_eq!(eval(&e.value(), &["x"], &[4.0]), 4.0);
        assert_eq!(eval(&e.value(), &["x"], &[-4.0]), 0.0);
    }

    #[test]
    fn test_plain_text_definition() {
        let def: FormulaDef = serde_yaml::from_str("\"a + b\"").unwrap();
        assert_eq!(def, FormulaDef::from("a + b"));
        let e = Expression::parse(&def, &Namespace::new()).unwrap();
        let symbols: Vec<String> = e.free_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_syntax() {
        let err = Expression::parse(&FormulaDef::from("a + * b"), &Namespace::new()).unwrap_err();
        assert!(matches!(err, BenthosError::Parse { .. }));
    }
}
