//! microbenthos-rs: Sediment Transport-Reaction Modelling
//!
//! A framework for simulating the coupled diffusion and reaction of solutes
//! in a 1-D column of sediment under a diffusive boundary layer (DBL), with
//! microbial groups, diel irradiance and adaptive time stepping.
//!
//! # Architecture
//!
//! microbenthos-rs is built on two core principles:
//!
//! 1. **Separation of Model and Numerics**
//!    - A declarative definition describes what to solve (entities, formulas,
//!      equations)
//!    - The field engine and the adaptive loop decide how to solve it
//!
//! 2. **Extensibility and Type Safety**
//!    - Entities are created through a class registry
//!    - Formulas are parsed once into typed expression trees
//!    - State is exchanged as a typed snapshot tree
//!
//! # Quick Start
//!
//! ```rust
//! use microbenthos_rs::model::MicroBenthosModel;
//! use microbenthos_rs::solver::{Simulation, SimulationConfig};
//!
//! # fn main() -> Result<(), microbenthos_rs::error::BenthosError> {
//! // 1. Build the model from its definition
//! let mut model = MicroBenthosModel::from_yaml_str(r#"
//! domain:
//!   cls: SedimentDBLDomain
//!   init_params: {cell_size: 0.1 mm, sediment_length: 1 mm, dbl_length: 0.5 mm}
//! environment:
//!   oxy:
//!     cls: Variable
//!     init_params:
//!       create: {value: 0.1, unit: mol/m**3, hasOld: true}
//!       constraints: {top: 0.2}
//!   D_oxy:
//!     cls: Variable
//!     init_params:
//!       create: {value: 2.0e-9, unit: m**2/s}
//! equations:
//!   oxyEqn:
//!     transient: [env.oxy, 1]
//!     diffusion: [env.D_oxy, 1]
//! "#)?;
//!
//! // 2. Configure the adaptive loop
//! let config = SimulationConfig::default()
//!     .with_total_hours(0.01)
//!     .with_snapshot_interval(6.0);
//!
//! // 3. Run it
//! let mut sim = Simulation::new(config)?;
//! let mut snapshots = 0;
//! for output in sim.evolution(&mut model)? {
//!     if output?.is_snapshot() {
//!         snapshots += 1;
//!     }
//! }
//! assert!(snapshots > 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`error`]: Error type of the crate
//! - [`physics`]: Units, mesh, fields and term assembly
//! - [`expression`]: Formula parsing and evaluation
//! - [`entity`]: Entity lifecycle, class registry and snapshot tree
//! - [`models`]: Domain, variables, processes, microbes, irradiance
//! - [`model`]: Model definition, path resolution and equations
//! - [`solver`]: Clock and adaptive time stepping
//! - [`output`]: Snapshot store, resume and exporters

// Core modules
pub mod error;
pub mod physics;
pub mod expression;

pub mod entity;
pub mod models;
pub mod model;
pub mod solver;
pub mod output;

pub mod prelude {
    //! Convenient imports for common usage
    //!
    //! ```rust
    //!
    //! use microbenthos_rs::prelude::*;
    //! ```
    pub use crate::error::{BenthosError, BenthosResult};
    pub use crate::entity::{Entity, StateNode};
    pub use crate::model::{MicroBenthosModel, ModelDefinition};
    pub use crate::physics::{LinearSolver, Unit};
    pub use crate::solver::{Simulation,
                            SimulationConfig,
                            SimulationRunner,
                            Steppable,
                            StepOutput};
    pub use crate::output::{Exporter,
                            ModelDataExporter,
                            ProgressExporter,
                            SnapshotStore};
}
