//! Symbolic expression tree
//!
//! All constructors used by the parser, substitution and differentiation go
//! through the folding helpers ([`Expr::add`], [`Expr::mul`], ...), which
//! evaluate constant sub-trees and drop additive zeros and multiplicative
//! ones. This keeps derivatives readable and lets callers check symbolic
//! dependence after differentiation with [`Expr::depends_on`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Builtin functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Exp,
    Log,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tanh,
    Min,
    Max,
}

impl Func {
    /// Resolve a builtin by name
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "exp" => Func::Exp,
            "log" | "ln" => Func::Log,
            "sqrt" => Func::Sqrt,
            "abs" | "Abs" => Func::Abs,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tanh" => Func::Tanh,
            "min" | "Min" => Func::Min,
            "max" | "Max" => Func::Max,
            _ => return None,
        };
        Some(func)
    }

    /// Number of arguments
    pub fn arity(&self) -> usize {
        match self {
            Func::Min | Func::Max => 2,
            _ => 1,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tanh => "tanh",
            Func::Min => "min",
            Func::Max => "max",
        }
    }

    /// Scalar evaluation of a single-argument builtin
    pub fn apply1(&self, x: f64) -> f64 {
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tanh => x.tanh(),
            Func::Min | Func::Max => x,
        }
    }

    /// Scalar evaluation of a two-argument builtin
    pub fn apply2(&self, x: f64, y: f64) -> f64 {
        match self {
            Func::Min => x.min(y),
            Func::Max => x.max(y),
            _ => self.apply1(x),
        }
    }
}

/// Comparison operators; they evaluate to indicator values 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    /// Indicator value of the comparison
    pub fn indicator(&self, a: f64, b: f64) -> f64 {
        let holds = match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        };
        if holds { 1.0 } else { 0.0 }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Sym(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    // ====================================== folding helpers ======================================

    /// Symbol node
    pub fn sym(name: impl Into<String>) -> Expr {
        Expr::Sym(name.into())
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the node is the literal `value`
    pub fn is_num(&self, value: f64) -> bool {
        self.as_num() == Some(value)
    }

    pub fn neg(a: Expr) -> Expr {
        match a {
            Expr::Num(v) => Expr::Num(-v),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x + y),
            (Some(x), _) if x == 0.0 => b,
            (_, Some(y)) if y == 0.0 => a,
            _ => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        if a == b {
            return Expr::Num(0.0);
        }
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x - y),
            (_, Some(y)) if y == 0.0 => a,
            (Some(x), _) if x == 0.0 => Expr::neg(b),
            _ => Expr::Sub(Box::new(a), Box::new(b)),
        }
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x * y),
            (Some(x), _) | (_, Some(x)) if x == 0.0 => Expr::Num(0.0),
            (Some(x), _) if x == 1.0 => b,
            (_, Some(y)) if y == 1.0 => a,
            (Some(x), _) if x == -1.0 => Expr::neg(b),
            (_, Some(y)) if y == -1.0 => Expr::neg(a),
            _ => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) if y != 0.0 => Expr::Num(x / y),
            (Some(x), _) if x == 0.0 => Expr::Num(0.0),
            (_, Some(y)) if y == 1.0 => a,
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn pow(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x.powf(y)),
            (_, Some(y)) if y == 0.0 => Expr::Num(1.0),
            (_, Some(y)) if y == 1.0 => a,
            _ => Expr::Pow(Box::new(a), Box::new(b)),
        }
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Expr {
        let numbers: Option<Vec<f64>> = args.iter().map(|a| a.as_num()).collect();
        match numbers.as_deref() {
            Some([x]) => Expr::Num(func.apply1(*x)),
            Some([x, y]) => Expr::Num(func.apply2(*x, *y)),
            _ => Expr::Call(func, args),
        }
    }

    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(op.indicator(x, y)),
            _ => Expr::Cmp(op, Box::new(a), Box::new(b)),
        }
    }

    pub fn and(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(if x != 0.0 && y != 0.0 { 1.0 } else { 0.0 }),
            _ => Expr::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn or(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(if x != 0.0 || y != 0.0 { 1.0 } else { 0.0 }),
            _ => Expr::Or(Box::new(a), Box::new(b)),
        }
    }

    pub fn not(a: Expr) -> Expr {
        match a.as_num() {
            Some(x) => Expr::Num(if x == 0.0 { 1.0 } else { 0.0 }),
            None => Expr::Not(Box::new(a)),
        }
    }

    // ========================================== Queries ==========================================

    /// Symbols appearing in the expression
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Sym(s) => {
                out.insert(s.clone());
            }
            Expr::Neg(a) | Expr::Not(a) => a.collect_symbols(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b)
            | Expr::Cmp(_, a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_symbols(out)),
        }
    }

    /// Whether `symbol` appears in the expression
    pub fn depends_on(&self, symbol: &str) -> bool {
        match self {
            Expr::Num(_) => false,
            Expr::Sym(s) => s == symbol,
            Expr::Neg(a) | Expr::Not(a) => a.depends_on(symbol),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Pow(a, b)
            | Expr::Cmp(_, a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b) => a.depends_on(symbol) || b.depends_on(symbol),
            Expr::Call(_, args) => args.iter().any(|a| a.depends_on(symbol)),
        }
    }

    // ====================================== transformations ======================================

    /// Replace symbols by expressions, folding constants on the way
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        let sub = |e: &Expr| e.substitute(map);
        match self {
            Expr::Num(v) => Expr::Num(*v),
            Expr::Sym(s) => map.get(s).cloned().unwrap_or_else(|| Expr::Sym(s.clone())),
            Expr::Neg(a) => Expr::neg(sub(a)),
            Expr::Add(a, b) => Expr::add(sub(a), sub(b)),
            Expr::Sub(a, b) => Expr::sub(sub(a), sub(b)),
            Expr::Mul(a, b) => Expr::mul(sub(a), sub(b)),
            Expr::Div(a, b) => Expr::div(sub(a), sub(b)),
            Expr::Pow(a, b) => Expr::pow(sub(a), sub(b)),
            Expr::Call(f, args) => Expr::call(*f, args.iter().map(sub).collect()),
            Expr::Cmp(op, a, b) => Expr::cmp(*op, sub(a), sub(b)),
            Expr::And(a, b) => Expr::and(sub(a), sub(b)),
            Expr::Or(a, b) => Expr::or(sub(a), sub(b)),
            Expr::Not(a) => Expr::not(sub(a)),
        }
    }

    /// Re-fold the tree through the simplifying constructors
    pub fn simplify(&self) -> Expr {
        self.substitute(&HashMap::new())
    }

    /// Symbolic derivative with respect to `x`
    ///
    /// Comparisons and logical operators are piecewise constant and
    /// differentiate to zero.
    pub fn derivative(&self, x: &str) -> Expr {
        if !self.depends_on(x) {
            return Expr::Num(0.0);
        }
        let d = |e: &Expr| e.derivative(x);
        match self {
            Expr::Num(_) => Expr::Num(0.0),
            Expr::Sym(_) => Expr::Num(1.0),
            Expr::Neg(a) => Expr::neg(d(a)),
            Expr::Add(a, b) => Expr::add(d(a), d(b)),
            Expr::Sub(a, b) => Expr::sub(d(a), d(b)),
            Expr::Mul(a, b) => Expr::add(
                Expr::mul(d(a), (**b).clone()),
                Expr::mul((**a).clone(), d(b)),
            ),
            Expr::Div(a, b) => Expr::div(
                Expr::sub(
                    Expr::mul(d(a), (**b).clone()),
                    Expr::mul((**a).clone(), d(b)),
                ),
                Expr::pow((**b).clone(), Expr::Num(2.0)),
            ),
            Expr::Pow(a, b) if !b.depends_on(x) => Expr::mul(
                Expr::mul(
                    (**b).clone(),
                    Expr::pow((**a).clone(), Expr::sub((**b).clone(), Expr::Num(1.0))),
                ),
                d(a),
            ),
            Expr::Pow(a, b) => Expr::mul(
                self.clone(),
                Expr::add(
                    Expr::mul(d(b), Expr::call(Func::Log, vec![(**a).clone()])),
                    Expr::div(Expr::mul((**b).clone(), d(a)), (**a).clone()),
                ),
            ),
            Expr::Call(func, args) => self.derivative_call(*func, args, x),
            Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => Expr::Num(0.0),
        }
    }

    fn derivative_call(&self, func: Func, args: &[Expr], x: &str) -> Expr {
        let a = args[0].clone();
        let da = args[0].derivative(x);
        match func {
            Func::Exp => Expr::mul(self.clone(), da),
            Func::Log => Expr::div(da, a),
            Func::Sqrt => Expr::div(da, Expr::mul(Expr::Num(2.0), self.clone())),
            Func::Abs => Expr::mul(da, Expr::div(a, self.clone())),
            Func::Sin => Expr::mul(Expr::call(Func::Cos, vec![a]), da),
            Func::Cos => Expr::neg(Expr::mul(Expr::call(Func::Sin, vec![a]), da)),
            Func::Tanh => Expr::mul(
                Expr::sub(Expr::Num(1.0), Expr::pow(self.clone(), Expr::Num(2.0))),
                da,
            ),
            Func::Min | Func::Max => {
                let b = args[1].clone();
                let db = args[1].derivative(x);
                let (first, second) = if func == Func::Min {
                    (CmpOp::Le, CmpOp::Gt)
                } else {
                    (CmpOp::Ge, CmpOp::Lt)
                };
                Expr::add(
                    Expr::mul(da, Expr::cmp(first, a.clone(), b.clone())),
                    Expr::mul(db, Expr::cmp(second, a, b)),
                )
            }
        }
    }

    // ========================================= rendering =========================================

    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(..) => 1,
            Expr::And(..) => 2,
            Expr::Not(_) => 3,
            Expr::Cmp(..) => 4,
            Expr::Add(..) | Expr::Sub(..) => 5,
            Expr::Mul(..) | Expr::Div(..) => 6,
            Expr::Neg(_) => 7,
            Expr::Num(v) if *v < 0.0 => 7,
            Expr::Pow(..) => 8,
            _ => 9,
        }
    }

    fn write_child(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }

    fn write_binary(
        f: &mut fmt::Formatter<'_>,
        a: &Expr,
        op: &str,
        b: &Expr,
        prec: u8,
        right_strict: bool,
    ) -> fmt::Result {
        a.write_child(f, prec)?;
        write!(f, "{}", op)?;
        b.write_child(f, if right_strict { prec + 1 } else { prec })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{}", v),
            Expr::Sym(s) => write!(f, "{}", s),
            Expr::Neg(a) => {
                write!(f, "-")?;
                a.write_child(f, 8)
            }
            Expr::Add(a, b) => Expr::write_binary(f, a, " + ", b, 5, false),
            Expr::Sub(a, b) => Expr::write_binary(f, a, " - ", b, 5, true),
            Expr::Mul(a, b) => Expr::write_binary(f, a, "*", b, 6, false),
            Expr::Div(a, b) => Expr::write_binary(f, a, "/", b, 6, true),
            Expr::Pow(a, b) => {
                a.write_child(f, 9)?;
                write!(f, "**")?;
                b.write_child(f, 8)
            }
            Expr::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Cmp(op, a, b) => {
                Expr::write_binary(f, a, &format!(" {} ", op.symbol()), b, 5, false)
            }
            Expr::And(a, b) => Expr::write_binary(f, a, " & ", b, 3, false),
            Expr::Or(a, b) => Expr::write_binary(f, a, " | ", b, 2, false),
            Expr::Not(a) => {
                write!(f, "~")?;
                a.write_child(f, 4)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::sym("x")
    }

    #[test]
    fn test_folding() {
        assert_eq!(Expr::add(Expr::Num(1.0), Expr::Num(2.0)), Expr::Num(3.0));
        assert_eq!(Expr::mul(Expr::Num(0.0), x()), Expr::Num(0.0));
        assert_eq!(Expr::mul(Expr::Num(1.0), x()), x());
        assert_eq!(Expr::sub(x(), x()), Expr::Num(0.0));
        assert_eq!(Expr::pow(x(), Expr::Num(1.0)), x());
        assert_eq!(Expr::neg(Expr::neg(x())), x());
    }

    #[test]
    fn test_derivative_of_linear_term() {
        let k_x = Expr::mul(Expr::sym("k"), x());
        assert_eq!(k_x.derivative("x"), Expr::sym("k"));
        assert_eq!(k_x.derivative("y"), Expr::Num(0.0));
    }

    #[test]
    fn test_derivative_of_monod_depends_on_variable() {
        // x / (K + x)
        let monod = Expr::div(x(), Expr::add(Expr::sym("K"), x()));
        let d = monod.derivative("x");
        assert!(d.depends_on("x"));
        assert!(d.depends_on("K"));
    }

    #[test]
    fn test_derivative_of_power_and_exp() {
        let square = Expr::pow(x(), Expr::Num(2.0));
        assert_eq!(square.derivative("x"), Expr::mul(Expr::Num(2.0), x()));

        let e = Expr::call(Func::Exp, vec![x()]);
        assert_eq!(e.derivative("x"), e);
    }

    #[test]
    fn test_condition_has_zero_derivative() {
        let cond = Expr::cmp(CmpOp::Lt, x(), Expr::sym("Kmax"));
        assert_eq!(cond.derivative("x"), Expr::Num(0.0));
    }

    #[test]
    fn test_substitute_folds() {
        let e = Expr::mul(Expr::sym("k"), x());
        let mut map = HashMap::new();
        map.insert("k".to_string(), Expr::Num(0.0));
        assert_eq!(e.substitute(&map), Expr::Num(0.0));
    }

    #[test]
    fn test_display() {
        let e = Expr::mul(
            Expr::sub(Expr::sym("a"), Expr::sym("b")),
            Expr::pow(x(), Expr::Num(2.0)),
        );
        assert_eq!(e.to_string(), "(a - b)*x**2");

        let nested = Expr::sub(Expr::sym("a"), Expr::sub(Expr::sym("b"), Expr::sym("c")));
        assert_eq!(nested.to_string(), "a - (b - c)");
    }

    #[test]
    fn test_free_symbols() {
        let e = Expr::add(Expr::sym("b"), Expr::call(Func::Max, vec![Expr::sym("a"), x()]));
        let symbols: Vec<_> = e.free_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["a", "b", "x"]);
    }
}
