//! Physical units and quantities
//!
//! Every numeric field of a model lives in SI base units (m, kg, s, mol, K).
//! Conversion happens once, when a definition value enters the model, so the
//! numeric core never needs to know about units again. This module provides:
//!
//! - [`Unit`]: a parsed unit expression (`"mmol/l"`, `"cm**2/s"`, `"1/h"`):
//!   dimension exponents plus a scale factor to the base units
//! - [`Quantity`]: a magnitude tagged with a unit
//! - [`ParamValue`]: the serde form of a definition value, which may be a plain
//!   number, a `"<value> <unit>"` string or a `{value, unit}` mapping
//!
//! # Example
//!
//! ```rust
//! use microbenthos_rs::physics::{Quantity, Unit};
//!
//! let conc = Quantity::parse("0.8e-3 mol/l").unwrap();
//! assert!((conc.base_value() - 0.8).abs() < 1e-12);
//! assert_eq!(conc.unit.base().label(), "mol/m**3");
//!
//! let depth = Unit::parse("mm").unwrap();
//! assert!(depth.is_compatible(&Unit::parse("m").unwrap()));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BenthosError, BenthosResult};

/// Number of tracked base dimensions: length, mass, time, amount, temperature
const N_DIMS: usize = 5;

const BASE_SYMBOLS: [&str; N_DIMS] = ["m", "kg", "s", "mol", "K"];

const LENGTH: [i32; N_DIMS] = [1, 0, 0, 0, 0];
const MASS: [i32; N_DIMS] = [0, 1, 0, 0, 0];
const TIME: [i32; N_DIMS] = [0, 0, 1, 0, 0];
const AMOUNT: [i32; N_DIMS] = [0, 0, 0, 1, 0];
const TEMPERATURE: [i32; N_DIMS] = [0, 0, 0, 0, 1];
const VOLUME: [i32; N_DIMS] = [3, 0, 0, 0, 0];

/// Known unit symbols with their dimensions and factor to base units
fn lookup_symbol(symbol: &str) -> Option<([i32; N_DIMS], f64)> {
    let entry = match symbol {
        "m" => (LENGTH, 1.0),
        "km" => (LENGTH, 1e3),
        "cm" => (LENGTH, 1e-2),
        "mm" => (LENGTH, 1e-3),
        "um" | "mum" | "µm" => (LENGTH, 1e-6),
        "nm" => (LENGTH, 1e-9),

        "kg" => (MASS, 1.0),
        "g" => (MASS, 1e-3),
        "mg" => (MASS, 1e-6),
        "ug" | "mug" | "µg" => (MASS, 1e-9),
        "ng" => (MASS, 1e-12),

        "s" => (TIME, 1.0),
        "ms" => (TIME, 1e-3),
        "min" => (TIME, 60.0),
        "h" | "hr" => (TIME, 3600.0),
        "d" | "day" => (TIME, 86400.0),

        "mol" => (AMOUNT, 1.0),
        "mmol" => (AMOUNT, 1e-3),
        "umol" | "mumol" | "µmol" => (AMOUNT, 1e-6),
        "nmol" => (AMOUNT, 1e-9),
        "pmol" => (AMOUNT, 1e-12),

        "l" | "L" => (VOLUME, 1e-3),
        "ml" | "mL" => (VOLUME, 1e-6),
        "ul" | "mul" | "µl" => (VOLUME, 1e-9),

        "K" => (TEMPERATURE, 1.0),
        _ => return None,
    };
    Some(entry)
}

// =================================================================================================
// Unit
// =================================================================================================

/// A physical unit: dimension exponents and a scale factor to base units
#[derive(Debug, Clone)]
pub struct Unit {
    dims: [i32; N_DIMS],
    factor: f64,
    label: String,
}

impl Unit {
    /// Dimensionless unit
    pub fn dimensionless() -> Self {
        Self {
            dims: [0; N_DIMS],
            factor: 1.0,
            label: "1".to_string(),
        }
    }

    /// SI metre
    pub fn meter() -> Self {
        Self::from_dims(LENGTH)
    }

    /// SI second
    pub fn second() -> Self {
        Self::from_dims(TIME)
    }

    fn from_dims(dims: [i32; N_DIMS]) -> Self {
        Self {
            dims,
            factor: 1.0,
            label: canonical_label(&dims),
        }
    }

    /// Parse a unit expression such as `"mmol/l/h"` or `"cm**2/s"`
    pub fn parse(text: &str) -> BenthosResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::dimensionless());
        }
        let mut parser = UnitParser {
            text: trimmed,
            chars: trimmed.char_indices().collect(),
            pos: 0,
        };
        let (dims, factor) = parser.expression()?;
        if parser.pos < parser.chars.len() {
            return Err(BenthosError::invalid_unit(trimmed, "unexpected trailing characters"));
        }
        Ok(Self {
            dims,
            factor,
            label: trimmed.to_string(),
        })
    }

    /// Label as written, or canonical form for derived units
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Scale factor to base units
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Whether all dimension exponents are zero
    pub fn is_dimensionless(&self) -> bool {
        self.dims.iter().all(|d| *d == 0)
    }

    /// Whether both units measure the same dimension
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// The base unit of the same dimension (factor 1)
    pub fn base(&self) -> Unit {
        Self::from_dims(self.dims)
    }

    /// Multiplier that converts a magnitude in `self` into `target`
    pub fn conversion_factor(&self, target: &Unit) -> BenthosResult<f64> {
        if !self.is_compatible(target) {
            return Err(BenthosError::unit_mismatch(
                "conversion",
                self.label.clone(),
                target.label.clone(),
            ));
        }
        Ok(self.factor / target.factor)
    }

    /// Integer power of the unit
    pub fn powi(&self, exponent: i32) -> Unit {
        let mut dims = self.dims;
        dims.iter_mut().for_each(|d| *d *= exponent);
        Self {
            dims,
            factor: self.factor.powi(exponent),
            label: canonical_label(&dims),
        }
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims
            && (self.factor - other.factor).abs() <= 1e-12 * self.factor.abs().max(other.factor.abs())
    }
}

impl std::ops::Mul for &Unit {
    type Output = Unit;
    fn mul(self, rhs: &Unit) -> Unit {
        let mut dims = self.dims;
        dims.iter_mut().zip(rhs.dims).for_each(|(a, b)| *a += b);
        Unit {
            dims,
            factor: self.factor * rhs.factor,
            label: canonical_label(&dims),
        }
    }
}

impl std::ops::Div for &Unit {
    type Output = Unit;
    fn div(self, rhs: &Unit) -> Unit {
        let mut dims = self.dims;
        dims.iter_mut().zip(rhs.dims).for_each(|(a, b)| *a -= b);
        Unit {
            dims,
            factor: self.factor / rhs.factor,
            label: canonical_label(&dims),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

fn canonical_label(dims: &[i32; N_DIMS]) -> String {
    let render = |positive: bool| -> Vec<String> {
        dims.iter()
            .zip(BASE_SYMBOLS)
            .filter(|(d, _)| if positive { **d > 0 } else { **d < 0 })
            .map(|(d, sym)| match d.abs() {
                1 => sym.to_string(),
                n => format!("{}**{}", sym, n),
            })
            .collect()
    };
    let numerator = render(true);
    let denominator = render(false);
    let num = if numerator.is_empty() {
        "1".to_string()
    } else {
        numerator.join("*")
    };
    match denominator.len() {
        0 => num,
        1 => format!("{}/{}", num, denominator[0]),
        _ => format!("{}/({})", num, denominator.join("*")),
    }
}

/// Recursive descent over `unit := factor (('*' | '/') factor)*`
struct UnitParser<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl UnitParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn fail(&self, message: &str) -> BenthosError {
        BenthosError::invalid_unit(self.text, message)
    }

    fn expression(&mut self) -> BenthosResult<([i32; N_DIMS], f64)> {
        let (mut dims, mut factor) = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    let (d, f) = self.factor()?;
                    dims.iter_mut().zip(d).for_each(|(a, b)| *a += b);
                    factor *= f;
                }
                Some('/') => {
                    self.pos += 1;
                    let (d, f) = self.factor()?;
                    dims.iter_mut().zip(d).for_each(|(a, b)| *a -= b);
                    factor /= f;
                }
                _ => return Ok((dims, factor)),
            }
        }
    }

    fn factor(&mut self) -> BenthosResult<([i32; N_DIMS], f64)> {
        let (mut dims, mut factor) = self.atom()?;
        self.skip_ws();
        let is_pow = match (self.peek(), self.chars.get(self.pos + 1).map(|(_, c)| *c)) {
            (Some('*'), Some('*')) => {
                self.pos += 2;
                true
            }
            (Some('^'), _) => {
                self.pos += 1;
                true
            }
            _ => false,
        };
        if is_pow {
            let exponent = self.integer()?;
            dims.iter_mut().for_each(|d| *d *= exponent);
            factor = factor.powi(exponent);
        }
        Ok((dims, factor))
    }

    fn integer(&mut self) -> BenthosResult<i32> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let token: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
        token
            .parse::<i32>()
            .map_err(|_| self.fail("exponent must be an integer"))
    }

    fn atom(&mut self) -> BenthosResult<([i32; N_DIMS], f64)> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expression()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.fail("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(
                    self.peek(),
                    Some(c) if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E'
                ) {
                    self.pos += 1;
                }
                let token: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
                let value = token
                    .parse::<f64>()
                    .map_err(|_| self.fail("invalid numeric factor"))?;
                Ok(([0; N_DIMS], value))
            }
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_alphabetic()) {
                    self.pos += 1;
                }
                let symbol: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
                lookup_symbol(&symbol).ok_or_else(|| self.fail(&format!("unknown symbol {:?}", symbol)))
            }
            _ => Err(self.fail("expected a unit symbol")),
        }
    }
}

// =================================================================================================
// Quantity
// =================================================================================================

/// A magnitude with its unit
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    /// Magnitude in `unit`
    pub value: f64,
    /// Unit of the magnitude
    pub unit: Unit,
}

impl Quantity {
    /// Create a quantity
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Dimensionless quantity
    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, Unit::dimensionless())
    }

    /// Parse `"<number> <unit>"`; a bare number is dimensionless
    pub fn parse(text: &str) -> BenthosResult<Self> {
        let trimmed = text.trim();
        let split = trimmed
            .char_indices()
            .find(|(i, c)| {
                c.is_whitespace()
                    || (c.is_alphabetic()
                        && !matches!(c, 'e' | 'E')
                        && *i > 0)
            })
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value = number
            .trim()
            .parse::<f64>()
            .map_err(|_| BenthosError::invalid_unit(trimmed, "expected '<number> <unit>'"))?;
        Ok(Self::new(value, Unit::parse(unit)?))
    }

    /// Magnitude converted to base units
    pub fn base_value(&self) -> f64 {
        self.value * self.unit.factor()
    }

    /// Magnitude converted to `target`
    pub fn in_units_of(&self, target: &Unit) -> BenthosResult<f64> {
        Ok(self.value * self.unit.conversion_factor(target)?)
    }

    /// The same quantity expressed in base units
    pub fn in_base_units(&self) -> Quantity {
        Quantity::new(self.base_value(), self.unit.base())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_dimensionless() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

// =================================================================================================
// Definition values
// =================================================================================================

/// A value as it appears in a model definition
///
/// A plain number has no unit of its own: the consumer decides which unit it
/// is implied to be in (for instance millimetres for domain lengths, or the
/// field unit for constraint values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Bare number
    Number(f64),
    /// Explicit `{value, unit}` mapping
    Tagged {
        /// Magnitude
        value: f64,
        /// Unit text
        unit: String,
    },
    /// `"<number> <unit>"` text
    Text(String),
}

impl ParamValue {
    /// Whether the value carries its own unit
    pub fn has_unit(&self) -> bool {
        !matches!(self, ParamValue::Number(_))
    }

    /// Interpret as a quantity, using `implied` for bare numbers
    pub fn to_quantity(&self, implied: &Unit) -> BenthosResult<Quantity> {
        match self {
            ParamValue::Number(v) => Ok(Quantity::new(*v, implied.clone())),
            ParamValue::Tagged { value, unit } => Ok(Quantity::new(*value, Unit::parse(unit)?)),
            ParamValue::Text(text) => Quantity::parse(text),
        }
    }

    /// Magnitude expressed in `target`, bare numbers taken as already in `target`
    pub fn value_in(&self, target: &Unit) -> BenthosResult<f64> {
        self.to_quantity(target)?.in_units_of(target)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}
