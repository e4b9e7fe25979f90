//! Term assembly and sweeps
//!
//! One equation of the model has the form
//!
//! ```text
//! c · ∂v/∂t = ∂/∂z (D · ∂v/∂z) + S0 + S1 · v
//! ```
//!
//! discretised implicitly in time on a uniform cell mesh. Face diffusivities
//! are the arithmetic mean of the neighbouring cell values and the outer
//! faces carry no flux; pinned cells replace their row by the identity.
//! The result is a tridiagonal system that can be solved directly with the
//! Thomas algorithm or through a dense LU factorisation.
//!
//! A sweep reports the residual `‖A·v − b‖₂` of the current values *before*
//! solving, so repeating sweeps with unchanged coefficients drives the
//! residual to round-off once the values satisfy the system.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BenthosError, BenthosResult};
use crate::physics::field::CellField;

/// Linear solver used for each sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolver {
    /// Thomas algorithm, O(n)
    #[default]
    Tridiagonal,
    /// Dense LU decomposition through nalgebra
    DenseLu,
}

/// Numeric coefficients of one equation for one sweep
#[derive(Debug, Clone)]
pub struct TermCoefficients {
    /// Coefficient of the transient term
    pub transient: f64,
    /// Cell diffusivities, if the equation has a diffusion term
    pub diffusion: Option<DVector<f64>>,
    /// Explicit source part `S0`
    pub explicit: DVector<f64>,
    /// Implicit source coefficient `S1`
    pub implicit: DVector<f64>,
}

impl TermCoefficients {
    /// Coefficients with only a transient term over `cells`
    pub fn transient_only(transient: f64, cells: usize) -> Self {
        Self {
            transient,
            diffusion: None,
            explicit: DVector::zeros(cells),
            implicit: DVector::zeros(cells),
        }
    }
}

/// Assembled tridiagonal system `A·v = b`
#[derive(Debug, Clone)]
pub struct TridiagonalSystem {
    lower: DVector<f64>,
    diag: DVector<f64>,
    upper: DVector<f64>,
    rhs: DVector<f64>,
}

impl TridiagonalSystem {
    /// Assemble the system for `field` over a step `dt`
    pub fn assemble(
        field: &CellField,
        terms: &TermCoefficients,
        dx: f64,
        dt: f64,
    ) -> BenthosResult<Self> {
        let n = field.len();
        if dt <= 0.0 || !dt.is_finite() {
            return Err(BenthosError::numerical(format!("invalid time step {}", dt)));
        }
        if terms.explicit.len() != n || terms.implicit.len() != n {
            return Err(BenthosError::numerical(format!(
                "source coefficients do not match the {} cells of {:?}",
                n,
                field.name()
            )));
        }

        let inv_dx2 = 1.0 / (dx * dx);
        let c_dt = terms.transient / dt;
        let old = field.old_values();

        let mut lower = DVector::zeros(n);
        let mut diag = DVector::zeros(n);
        let mut upper = DVector::zeros(n);
        let mut rhs = DVector::zeros(n);

        for i in 0..n {
            if let Some(pinned) = field.pinned(i) {
                diag[i] = 1.0;
                rhs[i] = pinned;
                continue;
            }
            let (d_left, d_right) = match &terms.diffusion {
                Some(d) => {
                    let left = if i > 0 { 0.5 * (d[i - 1] + d[i]) } else { 0.0 };
                    let right = if i + 1 < n { 0.5 * (d[i] + d[i + 1]) } else { 0.0 };
                    (left, right)
                }
                None => (0.0, 0.0),
            };
            lower[i] = -d_left * inv_dx2;
            upper[i] = -d_right * inv_dx2;
            diag[i] = c_dt + (d_left + d_right) * inv_dx2 - terms.implicit[i];
            rhs[i] = c_dt * old[i] + terms.explicit[i];
        }

        let system = Self {
            lower,
            diag,
            upper,
            rhs,
        };
        if !system.is_finite() {
            return Err(BenthosError::numerical(format!(
                "non-finite coefficients assembled for {:?}",
                field.name()
            )));
        }
        Ok(system)
    }

    fn is_finite(&self) -> bool {
        [&self.lower, &self.diag, &self.upper, &self.rhs]
            .iter()
            .all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Residual `‖A·x − b‖₂`
    pub fn residual(&self, x: &DVector<f64>) -> f64 {
        let n = x.len();
        (0..n)
            .map(|i| {
                let mut ax = self.diag[i] * x[i];
                if i > 0 {
                    ax += self.lower[i] * x[i - 1];
                }
                if i + 1 < n {
                    ax += self.upper[i] * x[i + 1];
                }
                (ax - self.rhs[i]).powi(2)
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Solve the system
    pub fn solve(&self, solver: LinearSolver) -> BenthosResult<DVector<f64>> {
        let solution = match solver {
            LinearSolver::Tridiagonal => self.solve_thomas()?,
            LinearSolver::DenseLu => self.solve_dense()?,
        };
        if solution.iter().any(|x| !x.is_finite()) {
            return Err(BenthosError::numerical("linear solve produced non-finite values"));
        }
        Ok(solution)
    }

    fn solve_thomas(&self) -> BenthosResult<DVector<f64>> {
        let n = self.diag.len();
        let mut c = DVector::zeros(n);
        let mut d = DVector::zeros(n);

        let mut pivot = self.diag[0];
        if pivot == 0.0 {
            return Err(BenthosError::numerical("zero pivot in tridiagonal solve"));
        }
        c[0] = self.upper[0] / pivot;
        d[0] = self.rhs[0] / pivot;
        for i in 1..n {
            pivot = self.diag[i] - self.lower[i] * c[i - 1];
            if pivot == 0.0 || !pivot.is_finite() {
                return Err(BenthosError::numerical("zero pivot in tridiagonal solve"));
            }
            c[i] = self.upper[i] / pivot;
            d[i] = (self.rhs[i] - self.lower[i] * d[i - 1]) / pivot;
        }

        let mut x = DVector::zeros(n);
        x[n - 1] = d[n - 1];
        for i in (0..n - 1).rev() {
            x[i] = d[i] - c[i] * x[i + 1];
        }
        Ok(x)
    }

    fn solve_dense(&self) -> BenthosResult<DVector<f64>> {
        let n = self.diag.len();
        let matrix = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                self.diag[i]
            } else if j + 1 == i {
                self.lower[i]
            } else if i + 1 == j {
                self.upper[i]
            } else {
                0.0
            }
        });
        matrix
            .lu()
            .solve(&self.rhs)
            .ok_or_else(|| BenthosError::numerical("singular matrix in LU solve"))
    }
}

/// Perform one sweep on `field` and return the residual before the solve
pub fn sweep(
    field: &mut CellField,
    terms: &TermCoefficients,
    dx: f64,
    dt: f64,
    solver: LinearSolver,
) -> BenthosResult<f64> {
    let system = TridiagonalSystem::assemble(field, terms, dx, dt)?;
    let residual = system.residual(field.values());
    let solution = system.solve(solver)?;
    field.set_values(solution)?;
    Ok(residual)
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::units::Unit;
    use approx::assert_relative_eq;

    fn field(values: Vec<f64>) -> CellField {
        CellField::new("c", Unit::dimensionless(), DVector::from_vec(values), true)
    }

    #[test]
    fn test_pure_decay_matches_backward_euler() {
        let mut f = field(vec![1.0; 4]);
        let mut terms = TermCoefficients::transient_only(1.0, 4);
        terms.implicit = DVector::from_element(4, -0.5);
        sweep(&mut f, &terms, 1.0, 0.1, LinearSolver::Tridiagonal).unwrap();
        for v in f.values().iter() {
            assert_relative_eq!(*v, 1.0 / 1.05, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_second_sweep_residual_vanishes() {
        let mut f = field(vec![0.0, 0.0, 0.0, 0.0, 0.0]);
        f.constrain(1.0, 0..1).unwrap();
        let mut terms = TermCoefficients::transient_only(1.0, 5);
        terms.diffusion = Some(DVector::from_element(5, 1.0));

        let first = sweep(&mut f, &terms, 1.0, 1.0, LinearSolver::Tridiagonal).unwrap();
        let second = sweep(&mut f, &terms, 1.0, 1.0, LinearSolver::Tridiagonal).unwrap();
        assert!(first > 0.1);
        assert!(second < 1e-12);
        assert_eq!(f.values()[0], 1.0);
        assert!(f.values()[1] > f.values()[2]);
    }

    #[test]
    fn test_solvers_agree() {
        let mut a = field(vec![0.5, 0.1, 0.9, 0.3, 0.0, 0.2]);
        let mut b = a.clone();
        let mut terms = TermCoefficients::transient_only(2.0, 6);
        terms.diffusion = Some(DVector::from_fn(6, |i, _| 0.1 + 0.05 * i as f64));
        terms.explicit = DVector::from_element(6, 0.01);

        sweep(&mut a, &terms, 0.1, 0.5, LinearSolver::Tridiagonal).unwrap();
        sweep(&mut b, &terms, 0.1, 0.5, LinearSolver::DenseLu).unwrap();
        for (x, y) in a.values().iter().zip(b.values().iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_diffusion_conserves_mass_with_closed_boundaries() {
        let mut f = field(vec![0.0, 0.0, 4.0, 0.0, 0.0]);
        let mut terms = TermCoefficients::transient_only(1.0, 5);
        terms.diffusion = Some(DVector::from_element(5, 0.3));
        sweep(&mut f, &terms, 1.0, 1.0, LinearSolver::Tridiagonal).unwrap();
        assert_relative_eq!(f.values().sum(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_step() {
        let f = field(vec![1.0; 3]);
        let terms = TermCoefficients::transient_only(1.0, 3);
        assert!(TridiagonalSystem::assemble(&f, &terms, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_non_finite_coefficients() {
        let f = field(vec![1.0; 3]);
        let mut terms = TermCoefficients::transient_only(1.0, 3);
        terms.explicit[1] = f64::NAN;
        let err = TridiagonalSystem::assemble(&f, &terms, 1.0, 1.0).unwrap_err();
        assert!(err.is_numerical());
    }
}
