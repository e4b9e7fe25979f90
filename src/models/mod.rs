//! Entities of a sediment model
//!
//! Everything a model definition can declare lives here. Each of them is an
//! [`Entity`](crate::entity::Entity): it is configured first, then bound to a
//! [`SedimentDBLDomain`], then set up (creating its fields on the mesh).
//!
//! # Available Entities
//!
//! ## [`SedimentDBLDomain`]: the column
//!
//! A uniform 1-D mesh over the diffusive boundary layer (DBL) on top of the
//! sediment, with the `porosity` and `sed_mask` fields and the registry of
//! named fields. Depth zero is the sediment surface.
//!
//! ## [`ModelVariable`]: a state variable
//!
//! A field with a unit, an initial value or seed profile, boundary
//! constraints and optional clip bounds.
//!
//! ## [`Process`]: a symbolic rate
//!
//! A formula over variables and parameters, evaluated over a [`VarScope`],
//! optionally multiplied by response sub-processes. Processes can split
//! themselves into explicit and implicit source parts for an equation.
//!
//! ## [`MicrobialGroup`]: features and processes
//!
//! Feature variables seen only by the processes of the group.
//!
//! ## [`Irradiance`]: diel light with attenuation channels

// =================================================================================================
// Module Declarations
// =================================================================================================

pub mod domain;
pub mod irradiance;
pub mod microbes;
pub mod process;
pub mod variable;

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use domain::{DomainParams, Location, SedimentDBLDomain, VarScope};
pub use irradiance::{ChannelParams, Irradiance, IrradianceChannel, IrradianceParams};
pub use microbes::{GroupScope, MicrobesParams, MicrobialGroup};
pub use process::{call_in_scope, EventParams, ParamSet, Process, ProcessParams, SourceSplit};
pub use variable::{CreateParams, ModelVariable, SeedParams, SeedProfile, VariableParams};
