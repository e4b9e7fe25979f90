//! Numeric field data
//!
//! [`FieldData`] is the value type flowing through compiled expressions and
//! term assembly: either a uniform scalar or one value per mesh cell. Scalars
//! broadcast against cell vectors, which is how a constant parameter and a
//! depth profile combine in a formula such as `Qmax * biomass`.

use nalgebra::DVector;
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{BenthosError, BenthosResult};
use crate::solver::parallel_threshold;

/// Scalar or per-cell numeric values
///
/// # Examples
///
/// ```rust
/// use microbenthos_rs::physics::FieldData;
///
/// let k = FieldData::Scalar(2.0);
/// let c = FieldData::from_vec(vec![1.0, 2.0, 3.0]);
/// let rate = k.zip_with(&c, |a, b| a * b).unwrap();
/// assert_eq!(rate.to_vector(3).unwrap().as_slice(), &[2.0, 4.0, 6.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    /// Uniform value
    Scalar(f64),

    /// One value per cell
    Cells(DVector<f64>),
}

impl FieldData {
    // ======================================= constructors =======================================

    /// Create from a vector of cell values
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self::Cells(DVector::from_vec(values))
    }

    /// Uniform cell vector
    pub fn uniform(size: usize, value: f64) -> Self {
        Self::Cells(DVector::from_element(size, value))
    }

    // ========================================== Queries ==========================================

    /// Check data is scalar
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Number of values (1 for scalars)
    pub fn len(&self) -> usize {
        match self {
            FieldData::Scalar(_) => 1,
            FieldData::Cells(v) => v.len(),
        }
    }

    /// Check emptiness
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to extract as a scalar
    pub fn try_as_scalar(&self) -> Option<f64> {
        match self {
            FieldData::Scalar(value) => Some(*value),
            FieldData::Cells(_) => None,
        }
    }

    /// Whether every value is finite
    pub fn is_finite(&self) -> bool {
        match self {
            FieldData::Scalar(x) => x.is_finite(),
            FieldData::Cells(v) => v.iter().all(|x| x.is_finite()),
        }
    }

    /// Values broadcast to `size` cells
    pub fn to_vector(&self, size: usize) -> BenthosResult<DVector<f64>> {
        match self {
            FieldData::Scalar(x) => Ok(DVector::from_element(size, *x)),
            FieldData::Cells(v) if v.len() == size => Ok(v.clone()),
            FieldData::Cells(v) => Err(BenthosError::numerical(format!(
                "field of {} cells cannot be used on a mesh of {} cells",
                v.len(),
                size
            ))),
        }
    }

    // ====================================== Apply functions ======================================

    /// Apply a function element-wise in place
    pub fn apply<F>(&mut self, f: F)
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        match self {
            FieldData::Scalar(value) => *value = f(*value),
            FieldData::Cells(values) => {
                if values.len() > parallel_threshold() {
                    #[cfg(feature = "parallel")]
                    values.as_mut_slice().par_iter_mut().for_each(|x| *x = f(*x));
                    #[cfg(not(feature = "parallel"))]
                    values.iter_mut().for_each(|x| *x = f(*x));
                } else {
                    values.iter_mut().for_each(|x| *x = f(*x));
                }
            }
        }
    }

    /// Element-wise map into a new value
    pub fn map<F>(&self, f: F) -> FieldData
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let mut out = self.clone();
        out.apply(f);
        out
    }

    /// Combine two values element-wise, broadcasting scalars
    ///
    /// Fails when both sides are cell vectors of different lengths.
    pub fn zip_with<F>(&self, other: &FieldData, f: F) -> BenthosResult<FieldData>
    where
        F: Fn(f64, f64) -> f64,
    {
        use FieldData::*;
        match (self, other) {
            (Scalar(a), Scalar(b)) => Ok(Scalar(f(*a, *b))),
            (Scalar(a), Cells(b)) => Ok(Cells(b.map(|y| f(*a, y)))),
            (Cells(a), Scalar(b)) => Ok(Cells(a.map(|x| f(x, *b)))),
            (Cells(a), Cells(b)) => {
                if a.len() != b.len() {
                    return Err(BenthosError::numerical(format!(
                        "cell vectors must match in length ({} vs {})",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(Cells(a.zip_map(b, f)))
            }
        }
    }
}

// ================================== Simple arithmetic functions ==================================

impl std::ops::Mul<f64> for FieldData {
    type Output = FieldData;
    fn mul(self, scalar: f64) -> Self::Output {
        match self {
            FieldData::Scalar(x) => FieldData::Scalar(x * scalar),
            FieldData::Cells(x) => FieldData::Cells(x * scalar),
        }
    }
}

impl std::ops::Mul<FieldData> for f64 {
    type Output = FieldData;
    fn mul(self, rhs: FieldData) -> Self::Output {
        rhs * self
    }
}

impl From<f64> for FieldData {
    fn from(value: f64) -> Self {
        FieldData::Scalar(value)
    }
}

impl From<DVector<f64>> for FieldData {
    fn from(values: DVector<f64>) -> Self {
        FieldData::Cells(values)
    }
}

// ======================== Display ============================

impl fmt::Display for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldData::Scalar(value) => write!(f, "Scalar ({})", value),
            FieldData::Cells(value) => write!(f, "Cells [{}]", value.len()),
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let data = FieldData::Scalar(42.0);
        assert!(data.is_scalar());
        assert_eq!(data.len(), 1);
        assert_eq!(data.try_as_scalar(), Some(42.0));
    }

    #[test]
    fn test_broadcast() {
        let data = FieldData::Scalar(1.5);
        let v = data.to_vector(4).unwrap();
        assert_eq!(v.len(), 4);
        assert!(v.iter().all(|x| *x == 1.5));
    }

    #[test]
    fn test_length_mismatch() {
        let a = FieldData::uniform(3, 1.0);
        let b = FieldData::uniform(4, 1.0);
        assert!(a.zip_with(&b, |x, y| x + y).is_err());
        assert!(a.to_vector(4).is_err());
    }

    #[test]
    fn test_multiplication() {
        let data = FieldData::uniform(10, 2.0);
        let result = data * 3.0;
        assert_eq!(result.to_vector(10).unwrap()[0], 6.0);
    }

    #[test]
    fn test_apply_above_threshold() {
        let _guard = crate::solver::ThresholdGuard::save(4);
        let mut data = FieldData::uniform(16, 2.0);
        data.apply(|x| x * x);
        assert!(data.to_vector(16).unwrap().iter().all(|x| *x == 4.0));
    }

    #[test]
    fn test_finite_check() {
        assert!(FieldData::from_vec(vec![1.0, 2.0]).is_finite());
        assert!(!FieldData::from_vec(vec![1.0, f64::NAN]).is_finite());
    }
}
