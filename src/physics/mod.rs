//! Field engine
//!
//! This module provides the numeric substrate the model is built on: a
//! uniform 1-D mesh, named cell fields with units, and the assembly and
//! solution of implicit transient-diffusion-source equations.
//!
//! # Core Concepts
//!
//! - **Units** ([`Unit`], [`Quantity`]): definition values are converted to SI
//!   base units once, when they enter the model
//! - **Field data** ([`FieldData`]): scalar or per-cell values, broadcasting
//! - **Mesh** ([`Grid1D`]): cell centres and inter-centre distances
//! - **Cell field** ([`CellField`]): values, old values, pinned cells
//! - **Terms** ([`TermCoefficients`], [`sweep`]): one nonlinear iteration of an
//!   equation, returning its residual
//!
//! # Example
//!
//! ```rust
//! use microbenthos_rs::physics::{
//!     sweep, CellField, Grid1D, LinearSolver, TermCoefficients, Unit,
//! };
//! use nalgebra::DVector;
//!
//! let grid = Grid1D::new(1e-4, 20).unwrap();
//! let mut oxy = CellField::new("oxy", Unit::parse("mol/m**3").unwrap(),
//!                              DVector::zeros(20), true);
//! oxy.constrain(0.25, 0..1).unwrap();
//!
//! let mut terms = TermCoefficients::transient_only(1.0, 20);
//! terms.diffusion = Some(DVector::from_element(20, 2e-9));
//!
//! let residual = sweep(&mut oxy, &terms, grid.dx(), 60.0, LinearSolver::Tridiagonal).unwrap();
//! assert!(residual > 0.0);
//! assert!(oxy.values()[1] > 0.0);
//! ```

// module declaration
pub mod data;
pub mod field;
pub mod mesh;
pub mod terms;
pub mod units;

// re-export commonly used types for convenience
pub use data::FieldData;
pub use field::{CellField, Constraint, FieldId};
pub use mesh::Grid1D;
pub use terms::{sweep, LinearSolver, TermCoefficients, TridiagonalSystem};
pub use units::{ParamValue, Quantity, Unit};
