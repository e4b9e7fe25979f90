//! Uniform 1-D cell mesh

use nalgebra::DVector;

use crate::error::{BenthosError, BenthosResult};

/// Uniform one-dimensional mesh of `nx` cells of width `dx` (metres)
///
/// Cell `i` spans `[i·dx, (i+1)·dx]`; values live at the cell centres.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid1D {
    dx: f64,
    nx: usize,
}

impl Grid1D {
    /// Create a mesh, failing on non-positive widths or an empty mesh
    pub fn new(dx: f64, nx: usize) -> BenthosResult<Self> {
        if !(dx.is_finite() && dx > 0.0) {
            return Err(BenthosError::config("mesh", format!("cell width must be positive, got {}", dx)));
        }
        if nx < 2 {
            return Err(BenthosError::config("mesh", format!("mesh needs at least 2 cells, got {}", nx)));
        }
        Ok(Self { dx, nx })
    }

    /// Number of cells
    pub fn cells(&self) -> usize {
        self.nx
    }

    /// Cell width
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Cell centre coordinates
    pub fn cell_centers(&self) -> DVector<f64> {
        DVector::from_fn(self.nx, |i, _| (i as f64 + 0.5) * self.dx)
    }

    /// Distances between successive cell centres, one per cell
    ///
    /// The first entry is the half cell from the top face to the first
    /// centre, so that a cumulative sum yields the centre coordinates.
    pub fn cell_distances(&self) -> DVector<f64> {
        DVector::from_fn(self.nx, |i, _| if i == 0 { 0.5 * self.dx } else { self.dx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centers_and_distances() {
        let grid = Grid1D::new(0.5, 4).unwrap();
        let centers = grid.cell_centers();
        assert_relative_eq!(centers[0], 0.25);
        assert_relative_eq!(centers[3], 1.75);

        let distances = grid.cell_distances();
        let cumulative: f64 = distances.iter().sum();
        assert_relative_eq!(cumulative, centers[3]);
    }

    #[test]
    fn test_invalid_mesh() {
        assert!(Grid1D::new(0.0, 10).is_err());
        assert!(Grid1D::new(1.0, 1).is_err());
    }
}
