//! The composed model
//!
//! A [`MicroBenthosModel`] owns one domain, the environment entities, the
//! microbial groups and one [`ModelEquation`] per transient variable. It is
//! built from a [`ModelDefinition`] in a fixed order so that every entity
//! finds the fields it depends on:
//!
//! ```text
//! domain → formulae → construct env + microbes → attach
//!        → setup: env variables → group features → irradiance
//!                 → env processes → group processes
//!        → equations
//! ```
//!
//! The model implements [`Steppable`], so it can be driven by a
//! [`Simulation`](crate::solver::Simulation).

pub mod definition;
pub mod equation;
pub mod paths;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::entity::{DataNode, Entity, EntityKind, FactoryContext, Registry, SetupContext, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::expression::Namespace;
use crate::models::{Irradiance, MicrobialGroup, ModelVariable, Process, SedimentDBLDomain};
use crate::physics::{FieldId, LinearSolver};
use crate::solver::{ModelClock, Steppable};

pub use definition::{EquationDef, FormulaSpec, ModelDefinition};
pub use equation::{EquationState, ModelEquation, SourceInput, Tracked};
pub use paths::{ModelObject, ModelView, ObjectPath, ProcessHandle, ScopeRef, ScopeView, TermTarget};

/// An entity of the `environment` section
#[derive(Debug)]
pub enum EnvEntity {
    /// A model variable
    Variable(ModelVariable),
    /// A process over the domain fields
    Process(Process),
    /// The irradiance
    Irradiance(Irradiance),
}

impl EnvEntity {
    /// The entity behind the variant
    pub fn as_entity(&self) -> &dyn Entity {
        match self {
            EnvEntity::Variable(v) => v,
            EnvEntity::Process(p) => p,
            EnvEntity::Irradiance(i) => i,
        }
    }

    /// Mutable access to the entity behind the variant
    pub fn as_entity_mut(&mut self) -> &mut dyn Entity {
        match self {
            EnvEntity::Variable(v) => v,
            EnvEntity::Process(p) => p,
            EnvEntity::Irradiance(i) => i,
        }
    }
}

impl TryFrom<EntityKind> for EnvEntity {
    type Error = BenthosError;

    fn try_from(kind: EntityKind) -> BenthosResult<Self> {
        match kind {
            EntityKind::Variable(v) => Ok(EnvEntity::Variable(v)),
            EntityKind::Process(p) => Ok(EnvEntity::Process(p)),
            EntityKind::Irradiance(i) => Ok(EnvEntity::Irradiance(i)),
            other => Err(BenthosError::config(
                "environment",
                format!("{} cannot be an environment entity", other.class_name()),
            )),
        }
    }
}

/// Sediment and DBL transport-reaction model
#[derive(Debug)]
pub struct MicroBenthosModel {
    domain: SedimentDBLDomain,
    namespace: Namespace,
    env: BTreeMap<String, EnvEntity>,
    microbes: BTreeMap<String, MicrobialGroup>,
    equations: Vec<ModelEquation>,
    clock: ModelClock,
    fields: BTreeMap<String, FieldId>,
}

impl MicroBenthosModel {
    /// Build and set up a model with the default class registry
    pub fn from_definition(definition: &ModelDefinition) -> BenthosResult<Self> {
        Self::from_definition_with(definition, &Registry::with_defaults())
    }

    /// Build and set up a model resolving classes through `registry`
    pub fn from_definition_with(definition: &ModelDefinition, registry: &Registry) -> BenthosResult<Self> {
        info!("Setting up model from definition");
        let namespace = definition.namespace()?;
        let ctx = FactoryContext { namespace: &namespace };

        let domain = match registry.create("domain", &definition.domain, &ctx)? {
            EntityKind::Domain(domain) => *domain,
            other => {
                return Err(BenthosError::config(
                    "domain",
                    format!("expected a domain, got {}", other.class_name()),
                ));
            }
        };
        info!("Created domain with {} cells", domain.cells());

        let mut env = BTreeMap::new();
        for (name, def) in &definition.environment {
            let entity = EnvEntity::try_from(registry.create(name, def, &ctx)?)?;
            info!("Added env entity {} = {}", name, entity.as_entity().name());
            env.insert(name.clone(), entity);
        }

        let mut microbes = BTreeMap::new();
        for (name, def) in &definition.microbes {
            match registry.create(name, def, &ctx)? {
                EntityKind::MicrobialGroup(group) => {
                    info!("Added microbes entity {}", name);
                    microbes.insert(name.clone(), group);
                }
                other => {
                    return Err(BenthosError::config(
                        format!("microbes.{}", name),
                        format!("expected a microbial group, got {}", other.class_name()),
                    ));
                }
            }
        }

        let mut model = Self {
            domain,
            namespace,
            env,
            microbes,
            equations: Vec::new(),
            clock: ModelClock::new(),
            fields: BTreeMap::new(),
        };
        model.attach_entities()?;
        model.setup_entities()?;

        for (name, def) in &definition.equations {
            model.add_equation(name, def)?;
        }
        if !model.equations.is_empty() {
            info!("Full model equation: {}", model.full_equation());
        }
        info!("Model setup done");
        Ok(model)
    }

    /// Parse a YAML definition and build the model
    pub fn from_yaml_str(text: &str) -> BenthosResult<Self> {
        Self::from_definition(&ModelDefinition::from_yaml_str(text)?)
    }

    fn attach_entities(&mut self) -> BenthosResult<()> {
        for entity in self.env.values_mut() {
            entity.as_entity_mut().set_domain(&self.domain)?;
        }
        for group in self.microbes.values_mut() {
            group.set_domain(&self.domain)?;
        }
        Ok(())
    }

    fn setup_entities(&mut self) -> BenthosResult<()> {
        for (name, entity) in self.env.iter_mut() {
            if let EnvEntity::Variable(var) = entity {
                var.setup(&mut SetupContext::new(&mut self.domain, &self.fields))?;
                self.fields.insert(format!("env.{}", name), var.field_id()?);
            }
        }

        for (gname, group) in self.microbes.iter_mut() {
            group.setup_features(&mut SetupContext::new(&mut self.domain, &self.fields))?;
            for (fname, feature) in group.features() {
                self.fields
                    .insert(format!("microbes.{}.features.{}", gname, fname), feature.field_id()?);
            }
        }

        for (name, entity) in self.env.iter_mut() {
            if let EnvEntity::Irradiance(irr) = entity {
                irr.setup(&mut SetupContext::new(&mut self.domain, &self.fields))?;
                for (cname, channel) in irr.channels() {
                    self.fields
                        .insert(format!("env.{}.channels.{}", name, cname), channel.intensity_id()?);
                }
            }
        }

        for entity in self.env.values_mut() {
            if let EnvEntity::Process(process) = entity {
                process.setup(&mut SetupContext::new(&mut self.domain, &self.fields))?;
            }
        }

        for group in self.microbes.values_mut() {
            group.setup(&mut SetupContext::new(&mut self.domain, &self.fields))?;
        }

        debug!("Fields by path: {:?}", self.fields.keys().collect::<Vec<_>>());
        Ok(())
    }

    /// Create and finalize an equation from its term definitions
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - an equation called `name` exists
    /// - a term path does not resolve
    /// - the terms do not form a complete equation
    pub fn add_equation(&mut self, name: &str, def: &EquationDef) -> BenthosResult<()> {
        if self.equations.iter().any(|e| e.name() == name) {
            return Err(BenthosError::duplicate(name, "equations"));
        }
        def.validate(name)?;
        debug!(
            "Creating equation for transient={:?}, diffusion={:?} and sources={:?}",
            def.transient, def.diffusion, def.sources
        );

        let view = self.view();
        let (var_path, transient) = &def.transient;
        let var_id = view.field_of(var_path)?;
        if !view.domain.field(var_id).has_old() {
            return Err(BenthosError::config(
                format!("equations.{}", name),
                format!("transient variable {} must be created with hasOld", var_path),
            ));
        }
        let var_name = view.domain.field(var_id).name().to_string();

        let mut eqn = ModelEquation::new(name, var_path.clone(), var_name.clone(), var_id, def.track_budget);
        eqn.set_transient(*transient)?;
        if let Some((path, coeff)) = &def.diffusion {
            eqn.set_diffusion(path, *coeff, view.term_target(path)?)?;
        }
        for (path, coeff) in &def.sources {
            let input = match view.term_target(path)? {
                TermTarget::Field(id) => SourceInput::Field(id),
                TermTarget::Process(handle) => {
                    let process = view.process(&handle)?;
                    SourceInput::Process {
                        split: process.as_source_for(&var_name, None)?,
                        formula: process.full_expr(None)?,
                        events: process.event_fields()?,
                        handle,
                    }
                }
            };
            eqn.add_source(path, *coeff, input)?;
        }
        eqn.finalize(&view)?;

        info!("Adding equation {:?}", name);
        self.equations.push(eqn);
        Ok(())
    }

    /// All equations in their coupled textual form
    pub fn full_equation(&self) -> String {
        self.equations
            .iter()
            .map(|e| format!("({})", e.as_symbolic()))
            .collect::<Vec<_>>()
            .join(" & ")
    }

    // ========================================== accessors ==========================================

    /// Read-only view used for path lookup and evaluation
    pub fn view(&self) -> ModelView<'_> {
        ModelView::new(&self.domain, &self.env, &self.microbes)
    }

    /// Resolve a dotted model path
    pub fn get_object(&self, path: &str) -> BenthosResult<ModelObject<'_>> {
        self.view().get_object(path)
    }

    /// The domain
    pub fn domain(&self) -> &SedimentDBLDomain {
        &self.domain
    }

    /// Formula namespace
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Environment entities by name
    pub fn env(&self) -> &BTreeMap<String, EnvEntity> {
        &self.env
    }

    /// Microbial groups by name
    pub fn microbes(&self) -> &BTreeMap<String, MicrobialGroup> {
        &self.microbes
    }

    /// Equations in definition order
    pub fn equations(&self) -> &[ModelEquation] {
        &self.equations
    }

    /// Equation by name
    pub fn equation(&self, name: &str) -> Option<&ModelEquation> {
        self.equations.iter().find(|e| e.name() == name)
    }

    /// Field ids of the variables, features and channels by model path
    pub fn field_paths(&self) -> &BTreeMap<String, FieldId> {
        &self.fields
    }

    /// The irradiance, if one is configured
    pub fn irradiance(&self) -> Option<&Irradiance> {
        self.env.values().find_map(|e| match e {
            EnvEntity::Irradiance(irr) => Some(irr),
            _ => None,
        })
    }

    /// Jump the clock to `seconds` without notifying entities
    pub fn set_time(&mut self, seconds: f64) -> BenthosResult<()> {
        self.clock.set_time(seconds)
    }

    fn notify_time(&mut self) -> BenthosResult<()> {
        let clock = self.clock;
        for entity in self.env.values_mut() {
            if let EnvEntity::Irradiance(irr) = entity {
                irr.on_time_updated(&mut self.domain, &clock)?;
            }
        }
        for entity in self.env.values_mut() {
            if let EnvEntity::Process(process) = entity {
                process.on_time_updated(&mut self.domain, &clock)?;
            }
        }
        for group in self.microbes.values_mut() {
            group.on_time_updated(&mut self.domain, &clock)?;
        }
        Ok(())
    }

    // ========================================== snapshot ===========================================

    /// Restore the entities, budgets and clock at `tidx` of a stored series
    ///
    /// Branches missing from `state` are skipped with a warning.
    pub fn restore_from(&mut self, state: &StateNode, tidx: Option<usize>) -> BenthosResult<()> {
        info!("Restoring model at time index {:?}", tidx);
        let env = state.child("env");
        for (name, entity) in self.env.iter_mut() {
            match env.and_then(|e| e.child(name)) {
                Some(node) => entity.as_entity_mut().restore_from(&mut self.domain, node, tidx)?,
                None => warn!("No stored state for env.{}", name),
            }
        }
        let microbes = state.child("microbes");
        for (name, group) in self.microbes.iter_mut() {
            match microbes.and_then(|m| m.child(name)) {
                Some(node) => group.restore_from(&mut self.domain, node, tidx)?,
                None => warn!("No stored state for microbes.{}", name),
            }
        }
        let equations = state.child("equations");
        for eqn in self.equations.iter_mut() {
            if let Some(node) = equations.and_then(|e| e.child(eqn.name())) {
                eqn.restore_from(node, tidx)?;
            }
        }

        let time = state
            .child("time")
            .ok_or_else(|| BenthosError::snapshot("time", "missing model time"))?
            .require_data("time")?
            .to_scalar(tidx)?;
        self.clock.set_time(time)?;
        for entity in self.env.values_mut() {
            if let EnvEntity::Process(process) = entity {
                process.reset_event_clock(time);
            }
        }
        for group in self.microbes.values_mut() {
            group.reset_event_clock(time);
        }
        let clock = self.clock;
        for entity in self.env.values_mut() {
            if let EnvEntity::Irradiance(irr) = entity {
                irr.on_time_updated(&mut self.domain, &clock)?;
            }
        }
        info!("Restored model clock to {}", self.clock);
        Ok(())
    }
}

impl Steppable for MicroBenthosModel {
    fn clock(&self) -> ModelClock {
        self.clock
    }

    fn sweep(&mut self, dt: f64, solver: LinearSolver) -> BenthosResult<Vec<(String, f64)>> {
        if self.equations.is_empty() {
            return Err(BenthosError::config("model", "no equations available for model"));
        }
        let mut residuals = Vec::with_capacity(self.equations.len());
        for eqn in &self.equations {
            let terms = eqn.coefficients(&ModelView::new(&self.domain, &self.env, &self.microbes))?;
            let residual = eqn.sweep(&mut self.domain, &terms, dt, solver)?;
            residuals.push((eqn.name().to_string(), residual));
        }
        Ok(residuals)
    }

    fn update_vars(&mut self) -> BenthosResult<()> {
        for entity in self.env.values() {
            if let EnvEntity::Variable(var) = entity {
                var.update_var(&mut self.domain)?;
            }
        }
        for group in self.microbes.values() {
            group.update_features(&mut self.domain)?;
        }
        Ok(())
    }

    fn revert_vars(&mut self) -> BenthosResult<()> {
        for entity in self.env.values() {
            if let EnvEntity::Variable(var) = entity {
                var.revert_var(&mut self.domain)?;
            }
        }
        for group in self.microbes.values() {
            group.revert_features(&mut self.domain)?;
        }
        Ok(())
    }

    fn update_equations(&mut self, dt: f64) -> BenthosResult<()> {
        let view = ModelView::new(&self.domain, &self.env, &self.microbes);
        for eqn in self.equations.iter_mut() {
            eqn.update_tracked_budget(dt, &view)?;
        }
        Ok(())
    }

    fn advance_clock(&mut self, dt: f64) -> BenthosResult<()> {
        self.clock.increment_time(dt)?;
        self.notify_time()
    }

    fn snapshot(&self) -> BenthosResult<StateNode> {
        debug!("Creating model snapshot");
        let mut state = StateNode::new();
        state.insert_child(
            "time",
            StateNode::with_data(DataNode::scalar(self.clock.seconds(), "s")),
        );
        state.insert_child("domain", self.domain.snapshot());

        let mut env = StateNode::new();
        for (name, entity) in &self.env {
            env.insert_child(name.clone(), entity.as_entity().snapshot(&self.domain)?);
        }
        state.insert_child("env", env);

        let mut microbes = StateNode::new();
        for (name, group) in &self.microbes {
            microbes.insert_child(name.clone(), group.snapshot(&self.domain)?);
        }
        state.insert_child("microbes", microbes);

        let view = self.view();
        let mut equations = StateNode::new();
        for eqn in &self.equations {
            equations.insert_child(eqn.name().to_string(), eqn.snapshot(&view)?);
        }
        state.insert_child("equations", equations);
        Ok(state)
    }

    fn diel_period(&self) -> Option<f64> {
        self.irradiance().map(|irr| irr.period_seconds())
    }
}
