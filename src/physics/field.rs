//! Unit-aware cell fields
//!
//! A [`CellField`] holds one value per mesh cell in base units, an optional
//! copy of the values at the start of the current time step ("old" values),
//! and the set of cell ranges pinned to fixed values.

use std::ops::Range;

use nalgebra::DVector;

use crate::error::{BenthosError, BenthosResult};
use crate::physics::units::Unit;

/// Handle of a field inside a domain's field arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    /// Position in the arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Cells pinned to a fixed value
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Constrained cell range
    pub cells: Range<usize>,
    /// Pinned value in the field unit
    pub value: f64,
}

/// Named cell-centred field with unit, history and constraints
#[derive(Debug, Clone)]
pub struct CellField {
    name: String,
    unit: Unit,
    value: DVector<f64>,
    old: Option<DVector<f64>>,
    constraints: Vec<Constraint>,
}

impl CellField {
    /// Create a field; `has_old` enables old-value history
    pub fn new(name: impl Into<String>, unit: Unit, value: DVector<f64>, has_old: bool) -> Self {
        let old = has_old.then(|| value.clone());
        Self {
            name: name.into(),
            unit,
            value,
            old,
            constraints: Vec::new(),
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field unit (always a base unit)
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Check emptiness
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Current values
    pub fn values(&self) -> &DVector<f64> {
        &self.value
    }

    /// Replace the values; constraints are re-applied afterwards
    pub fn set_values(&mut self, values: DVector<f64>) -> BenthosResult<()> {
        if values.len() != self.value.len() {
            return Err(BenthosError::numerical(format!(
                "field {:?} has {} cells, got {} values",
                self.name,
                self.value.len(),
                values.len()
            )));
        }
        self.value = values;
        self.apply_constraints();
        Ok(())
    }

    /// Whether old values are retained
    pub fn has_old(&self) -> bool {
        self.old.is_some()
    }

    /// Values at the start of the step, or the current values without history
    pub fn old_values(&self) -> &DVector<f64> {
        self.old.as_ref().unwrap_or(&self.value)
    }

    /// Commit the current values as the old values
    pub fn update_old(&mut self) {
        if let Some(old) = self.old.as_mut() {
            old.copy_from(&self.value);
        }
    }

    /// Restore the current values from the old values
    pub fn revert(&mut self) {
        if let Some(old) = self.old.as_ref() {
            self.value.copy_from(old);
        }
    }

    /// Pin `cells` to `value`
    ///
    /// Constraining an already constrained range replaces its value, so
    /// repeating a constraint is idempotent.
    pub fn constrain(&mut self, value: f64, cells: Range<usize>) -> BenthosResult<()> {
        if cells.is_empty() || cells.end > self.value.len() {
            return Err(BenthosError::config(
                format!("field {}", self.name),
                format!("constraint range {:?} outside of {} cells", cells, self.value.len()),
            ));
        }
        match self.constraints.iter_mut().find(|c| c.cells == cells) {
            Some(existing) => existing.value = value,
            None => self.constraints.push(Constraint { cells, value }),
        }
        self.apply_constraints();
        Ok(())
    }

    /// Active constraints
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Pinned value of cell `i`, if any (later constraints win)
    pub fn pinned(&self, i: usize) -> Option<f64> {
        self.constraints
            .iter()
            .rev()
            .find(|c| c.cells.contains(&i))
            .map(|c| c.value)
    }

    fn apply_constraints(&mut self) {
        for c in &self.constraints {
            self.value.rows_mut(c.cells.start, c.cells.len()).fill(c.value);
        }
    }

    /// Clip the values into `[min, max]`
    pub fn clip(&mut self, min: Option<f64>, max: Option<f64>) {
        let lo = min.unwrap_or(f64::NEG_INFINITY);
        let hi = max.unwrap_or(f64::INFINITY);
        self.value.apply(|x| *x = x.clamp(lo, hi));
    }
}
