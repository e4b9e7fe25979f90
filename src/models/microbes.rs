//! Microbial groups
//!
//! A [`MicrobialGroup`] bundles feature variables (one of which is, by
//! convention, `biomass`) with the processes of the group. Feature fields
//! are not registered on the domain by name; the processes of the group see
//! them through a [`GroupScope`], which looks names up in the features first
//! and falls back to the domain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entity::{next_id, Entity, EntityCore, SetupContext, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::expression::Namespace;
use crate::models::domain::{SedimentDBLDomain, VarScope};
use crate::models::process::{Process, ProcessParams};
use crate::models::variable::{ModelVariable, VariableParams};
use crate::physics::{CellField, FieldId};
use crate::solver::ModelClock;

/// Definition of a microbial group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MicrobesParams {
    /// Optional name, must match the entity name when given
    #[serde(default)]
    pub name: Option<String>,
    /// Feature variables by name
    #[serde(default)]
    pub features: BTreeMap<String, VariableParams>,
    /// Processes by name
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessParams>,
}

/// Features and processes of one group of microbes
#[derive(Debug)]
pub struct MicrobialGroup {
    core: EntityCore,
    scope_id: u64,
    features: BTreeMap<String, ModelVariable>,
    processes: BTreeMap<String, Process>,
}

impl MicrobialGroup {
    /// Build the features and processes of a definition
    pub fn new(
        name: impl Into<String>,
        params: &MicrobesParams,
        namespace: &Namespace,
    ) -> BenthosResult<Self> {
        let name = name.into();
        if let Some(given) = &params.name
            && *given != name
        {
            return Err(BenthosError::config(
                format!("microbes {}", name),
                format!("init_params name {:?} differs from the entity name", given),
            ));
        }

        let mut features = BTreeMap::new();
        for (fname, def) in &params.features {
            features.insert(fname.clone(), ModelVariable::unstored(fname.clone(), def.clone())?);
        }
        if !features.contains_key("biomass") {
            warn!("Microbial group {} has no biomass feature", name);
        }

        let mut processes = BTreeMap::new();
        for (pname, def) in &params.processes {
            if features.contains_key(pname) {
                return Err(BenthosError::duplicate(pname.clone(), format!("microbes {}", name)));
            }
            processes.insert(pname.clone(), Process::new(pname.clone(), def, namespace)?);
        }

        debug!(
            "Created microbial group {} with features {:?} and processes {:?}",
            name,
            features.keys().collect::<Vec<_>>(),
            processes.keys().collect::<Vec<_>>()
        );
        Ok(Self {
            core: EntityCore::new(name),
            scope_id: next_id(),
            features,
            processes,
        })
    }

    /// Feature variables
    pub fn features(&self) -> &BTreeMap<String, ModelVariable> {
        &self.features
    }

    /// Processes of the group
    pub fn processes(&self) -> &BTreeMap<String, Process> {
        &self.processes
    }

    /// Feature by name
    pub fn feature(&self, name: &str) -> Option<&ModelVariable> {
        self.features.get(name)
    }

    /// Process by name
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.get(name)
    }

    /// Biomass field, if the group has one
    pub fn biomass<'d>(&self, domain: &'d SedimentDBLDomain) -> Option<&'d CellField> {
        self.feature("biomass")
            .and_then(|f| f.field_id().ok())
            .map(|id| domain.field(id))
    }

    /// Evaluation scope seeing the features over the domain
    pub fn scope<'a>(&'a self, domain: &'a SedimentDBLDomain) -> GroupScope<'a> {
        GroupScope { group: self, domain }
    }

    /// Create the feature fields
    pub fn setup_features(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        for feature in self.features.values_mut() {
            feature.setup(ctx)?;
        }
        Ok(())
    }

    /// Set up the processes
    pub fn setup_processes(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        for process in self.processes.values_mut() {
            process.setup(ctx)?;
        }
        Ok(())
    }

    /// Commit an accepted step on the features
    pub fn update_features(&self, domain: &mut SedimentDBLDomain) -> BenthosResult<()> {
        for feature in self.features.values() {
            feature.update_var(domain)?;
        }
        Ok(())
    }

    /// Undo the tentative feature values
    pub fn revert_features(&self, domain: &mut SedimentDBLDomain) -> BenthosResult<()> {
        for feature in self.features.values() {
            feature.revert_var(domain)?;
        }
        Ok(())
    }

    /// Reset the event timers of the processes
    pub fn reset_event_clock(&mut self, time: f64) {
        for process in self.processes.values_mut() {
            process.reset_event_clock(time);
        }
    }
}

impl Entity for MicrobialGroup {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn on_domain_set(&mut self, domain: &SedimentDBLDomain) -> BenthosResult<()> {
        for feature in self.features.values_mut() {
            feature.set_domain(domain)?;
        }
        for process in self.processes.values_mut() {
            process.set_domain(domain)?;
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        if self.is_setup() {
            return Ok(());
        }
        self.core.check_domain(ctx.domain)?;
        self.setup_features(ctx)?;
        self.setup_processes(ctx)?;
        self.core.mark_setup()
    }

    fn on_time_updated(&mut self, domain: &mut SedimentDBLDomain, clock: &ModelClock) -> BenthosResult<()> {
        let mut pending = Vec::with_capacity(self.processes.len());
        {
            let scope = self.scope(domain);
            for (name, process) in &self.processes {
                pending.push((name.clone(), process.event_conditions(&scope)?));
            }
        }
        for (name, conditions) in pending {
            if let Some(process) = self.processes.get_mut(&name) {
                process.advance_events(domain, conditions, clock.seconds())?;
            }
        }
        Ok(())
    }

    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode> {
        self.core.check_domain(domain)?;
        let mut features = StateNode::new();
        for (name, feature) in &self.features {
            features.insert_child(name.clone(), feature.snapshot(domain)?);
        }
        let scope = self.scope(domain);
        let mut processes = StateNode::new();
        for (name, process) in &self.processes {
            processes.insert_child(name.clone(), process.snapshot_in(&scope)?);
        }
        let mut state = StateNode::new();
        state.insert_child("features", features);
        state.insert_child("processes", processes);
        Ok(state)
    }

    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        self.core.check_domain(domain)?;
        let features = state.child("features");
        for (name, feature) in self.features.iter_mut() {
            match features.and_then(|f| f.child(name)) {
                Some(node) => feature.restore_from(domain, node, tidx)?,
                None => warn!("No stored state for feature {} of {}", name, self.core.name()),
            }
        }
        if let Some(processes) = state.child("processes") {
            for (name, process) in self.processes.iter_mut() {
                if let Some(node) = processes.child(name) {
                    process.restore_from(domain, node, tidx)?;
                }
            }
        }
        Ok(())
    }
}

/// Name lookup through the features of a group, then the domain
pub struct GroupScope<'a> {
    group: &'a MicrobialGroup,
    domain: &'a SedimentDBLDomain,
}

impl VarScope for GroupScope<'_> {
    fn scope_id(&self) -> u64 {
        self.group.scope_id
    }

    fn revision(&self) -> u64 {
        self.domain.revision()
    }

    fn lookup(&self, name: &str) -> Option<&CellField> {
        self.group
            .features
            .get(name)
            .and_then(|f| f.field_id().ok())
            .map(|id| self.domain.field(id))
            .or_else(|| self.domain.get(name))
    }

    fn field(&self, id: FieldId) -> &CellField {
        self.domain.field(id)
    }

    fn cells(&self) -> usize {
        self.domain.cells()
    }
}
