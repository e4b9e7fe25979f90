//! Declarative model definition
//!
//! A definition is a YAML mapping with the sections `domain`, `formulae`,
//! `environment`, `microbes`, `equations` and an optional `simulation`:
//!
//! ```yaml
//! domain:
//!   cls: SedimentDBLDomain
//!   init_params: {cell_size: 0.1 mm, sediment_length: 10 mm, dbl_length: 1 mm}
//!
//! formulae:
//!   optimum_response:
//!     vars: [x, Ks]
//!     expr: x / (Ks + x)
//!
//! environment:
//!   oxy:
//!     cls: Variable
//!     init_params:
//!       create: {value: 0.2, unit: mol/m**3, hasOld: true}
//!       constraints: {top: 0.2}
//!   D_oxy:
//!     cls: Variable
//!     init_params:
//!       create: {value: 2.0e-9, unit: m**2/s}
//!
//! equations:
//!   oxyEqn:
//!     transient: [env.oxy, 1]
//!     diffusion: [env.D_oxy, 1]
//!     sources: [[microbes.cyano.processes.oxyPS, 1]]
//!     track_budget: true
//! ```
//!
//! The whole definition may also be nested under a single `model` key.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::EntityDef;
use crate::error::{BenthosError, BenthosResult};
use crate::expression::Namespace;
use crate::solver::SimulationConfig;

/// A user formula available to every expression of the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaSpec {
    /// Argument names, in call order
    #[serde(alias = "variables")]
    pub vars: Vec<String>,
    /// Body over the arguments
    pub expr: String,
}

/// Terms of one equation as `(path, coeff)` pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquationDef {
    /// The variable and its transient coefficient
    pub transient: (String, f64),
    /// Diffusivity source
    #[serde(default)]
    pub diffusion: Option<(String, f64)>,
    /// Source terms
    #[serde(default)]
    pub sources: Vec<(String, f64)>,
    /// Keep a depth integrated budget of the variable
    #[serde(default)]
    pub track_budget: bool,
}

impl EquationDef {
    /// Check the term layout without resolving any path
    pub fn validate(&self, name: &str) -> BenthosResult<()> {
        if self.diffusion.is_none() && self.sources.is_empty() {
            return Err(BenthosError::equation(
                name,
                "one or both of diffusion and source terms must be given",
            ));
        }
        let mut seen = Vec::with_capacity(self.sources.len());
        for (path, _) in &self.sources {
            if seen.contains(&path) {
                return Err(BenthosError::duplicate(path.clone(), format!("sources of {}", name)));
            }
            seen.push(path);
        }
        Ok(())
    }
}

/// Complete model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDefinition {
    /// The domain entity
    pub domain: EntityDef,
    /// Formula namespace
    #[serde(default)]
    pub formulae: BTreeMap<String, FormulaSpec>,
    /// Variables, processes and the irradiance
    #[serde(default)]
    pub environment: BTreeMap<String, EntityDef>,
    /// Microbial groups
    #[serde(default)]
    pub microbes: BTreeMap<String, EntityDef>,
    /// Equations by name
    #[serde(default)]
    pub equations: BTreeMap<String, EquationDef>,
    /// Settings of the simulation run
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

impl ModelDefinition {
    /// Parse a definition, nested under `model` or not
    pub fn from_yaml_str(text: &str) -> BenthosResult<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if let serde_yaml::Value::Mapping(map) = &mut value
            && map.len() == 1
            && let Some(inner) = map.remove("model")
        {
            debug!("Unwrapping definition nested under 'model'");
            value = inner;
        }
        let definition: ModelDefinition = serde_yaml::from_value(value)?;
        definition.validate()?;
        info!(
            "Loaded definition: {} formulae, {} env, {} microbes, {} equations",
            definition.formulae.len(),
            definition.environment.len(),
            definition.microbes.len(),
            definition.equations.len()
        );
        Ok(definition)
    }

    /// Read and parse a definition file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> BenthosResult<Self> {
        let path = path.as_ref();
        info!("Loading model definition from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Serialize back to YAML
    pub fn to_yaml_string(&self) -> BenthosResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the parts that do not need the built model
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - an equation has neither diffusion nor sources, or repeats a source
    /// - the simulation section is invalid
    pub fn validate(&self) -> BenthosResult<()> {
        for (name, eqn) in &self.equations {
            eqn.validate(name)?;
        }
        if let Some(sim) = &self.simulation {
            sim.validate()?;
        }
        Ok(())
    }

    /// Formula namespace of the definition
    pub fn namespace(&self) -> BenthosResult<Namespace> {
        let mut namespace = Namespace::new();
        for (name, formula) in &self.formulae {
            namespace.define(name, &formula.vars, &formula.expr)?;
        }
        Ok(namespace)
    }
}
