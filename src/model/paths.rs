//! Model paths
//!
//! Every object of a model is addressed by a dotted path:
//!
//! | path                                  | object                      |
//! |---------------------------------------|-----------------------------|
//! | `domain.<field>`                      | stored field of the domain  |
//! | `env.<name>`                          | variable, process, irradiance |
//! | `env.<irradiance>.channels.<channel>` | irradiance channel          |
//! | `microbes.<group>`                    | microbial group             |
//! | `microbes.<group>.features.<name>`    | feature variable            |
//! | `microbes.<group>.processes.<name>`   | process of the group        |
//!
//! [`ModelView`] resolves paths into a typed [`ModelObject`] and hands out
//! the evaluation scopes of processes.

use std::collections::BTreeMap;

use crate::error::{BenthosError, BenthosResult};
use crate::model::EnvEntity;
use crate::models::{
    GroupScope, Irradiance, IrradianceChannel, MicrobialGroup, ModelVariable, Process,
    SedimentDBLDomain, VarScope,
};
use crate::physics::{CellField, FieldId};

/// A parsed model path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPath<'p> {
    /// `domain.<field>`
    DomainField(&'p str),
    /// `env.<name>`
    Env(&'p str),
    /// `env.<irradiance>.channels.<channel>`
    Channel {
        /// Irradiance name
        irradiance: &'p str,
        /// Channel name
        channel: &'p str,
    },
    /// `microbes.<group>`
    Group(&'p str),
    /// `microbes.<group>.features.<name>`
    Feature {
        /// Group name
        group: &'p str,
        /// Feature name
        feature: &'p str,
    },
    /// `microbes.<group>.processes.<name>`
    GroupProcess {
        /// Group name
        group: &'p str,
        /// Process name
        process: &'p str,
    },
}

impl<'p> ObjectPath<'p> {
    /// Split a dotted path
    pub fn parse(path: &'p str) -> BenthosResult<Self> {
        if !path.contains('.') {
            return Err(BenthosError::InvalidPath {
                path: path.to_string(),
            });
        }
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(BenthosError::InvalidPath {
                path: path.to_string(),
            });
        }
        match parts[..] {
            ["domain", field] => Ok(ObjectPath::DomainField(field)),
            ["env", name] => Ok(ObjectPath::Env(name)),
            ["env", irradiance, "channels", channel] => Ok(ObjectPath::Channel { irradiance, channel }),
            ["microbes", group] => Ok(ObjectPath::Group(group)),
            ["microbes", group, "features", feature] => Ok(ObjectPath::Feature { group, feature }),
            ["microbes", group, "processes", process] => Ok(ObjectPath::GroupProcess { group, process }),
            _ => Err(BenthosError::not_found(path)),
        }
    }
}

/// An object of the model
#[derive(Debug, Clone, Copy)]
pub enum ModelObject<'a> {
    /// Field of the domain
    Field(&'a CellField),
    /// Environment variable or group feature
    Variable(&'a ModelVariable),
    /// Environment or group process
    Process(&'a Process),
    /// The irradiance
    Irradiance(&'a Irradiance),
    /// A channel of the irradiance
    Channel(&'a IrradianceChannel),
    /// A group of microbes
    MicrobialGroup(&'a MicrobialGroup),
}

/// Which scope a process is evaluated in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRef {
    /// Domain fields
    Domain,
    /// Features of a group, then domain fields
    Group(String),
}

/// Location of a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Evaluation scope
    pub scope: ScopeRef,
    /// Process name within its container
    pub name: String,
}

/// What an equation term reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermTarget {
    /// Values of a field
    Field(FieldId),
    /// Evaluation of a process
    Process(ProcessHandle),
}

/// Evaluation scope handed out by [`ModelView::scope`]
pub enum ScopeView<'a> {
    /// Domain fields only
    Domain(&'a SedimentDBLDomain),
    /// Group features over the domain
    Group(GroupScope<'a>),
}

impl VarScope for ScopeView<'_> {
    fn scope_id(&self) -> u64 {
        match self {
            ScopeView::Domain(d) => d.scope_id(),
            ScopeView::Group(g) => g.scope_id(),
        }
    }

    fn revision(&self) -> u64 {
        match self {
            ScopeView::Domain(d) => d.revision(),
            ScopeView::Group(g) => g.revision(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&CellField> {
        match self {
            ScopeView::Domain(d) => d.lookup(name),
            ScopeView::Group(g) => g.lookup(name),
        }
    }

    fn field(&self, id: FieldId) -> &CellField {
        match self {
            ScopeView::Domain(d) => VarScope::field(*d, id),
            ScopeView::Group(g) => g.field(id),
        }
    }

    fn cells(&self) -> usize {
        match self {
            ScopeView::Domain(d) => d.cells(),
            ScopeView::Group(g) => g.cells(),
        }
    }
}

/// Read-only view over the parts of a model
#[derive(Clone, Copy)]
pub struct ModelView<'a> {
    /// The domain
    pub domain: &'a SedimentDBLDomain,
    /// Environment entities
    pub env: &'a BTreeMap<String, EnvEntity>,
    /// Microbial groups
    pub microbes: &'a BTreeMap<String, MicrobialGroup>,
}

impl<'a> ModelView<'a> {
    /// Bundle the parts
    pub fn new(
        domain: &'a SedimentDBLDomain,
        env: &'a BTreeMap<String, EnvEntity>,
        microbes: &'a BTreeMap<String, MicrobialGroup>,
    ) -> Self {
        Self { domain, env, microbes }
    }

    fn group(&self, name: &str, path: &str) -> BenthosResult<&'a MicrobialGroup> {
        self.microbes.get(name).ok_or_else(|| BenthosError::not_found(path))
    }

    /// Resolve a dotted path
    pub fn get_object(&self, path: &str) -> BenthosResult<ModelObject<'a>> {
        let missing = || BenthosError::not_found(path);
        match ObjectPath::parse(path)? {
            ObjectPath::DomainField(name) => {
                self.domain.get(name).map(ModelObject::Field).ok_or_else(missing)
            }
            ObjectPath::Env(name) => match self.env.get(name).ok_or_else(missing)? {
                EnvEntity::Variable(v) => Ok(ModelObject::Variable(v)),
                EnvEntity::Process(p) => Ok(ModelObject::Process(p)),
                EnvEntity::Irradiance(i) => Ok(ModelObject::Irradiance(i)),
            },
            ObjectPath::Channel { irradiance, channel } => match self.env.get(irradiance) {
                Some(EnvEntity::Irradiance(irr)) => {
                    irr.channel(channel).map(ModelObject::Channel).ok_or_else(missing)
                }
                _ => Err(missing()),
            },
            ObjectPath::Group(group) => self.group(group, path).map(ModelObject::MicrobialGroup),
            ObjectPath::Feature { group, feature } => self
                .group(group, path)?
                .feature(feature)
                .map(ModelObject::Variable)
                .ok_or_else(missing),
            ObjectPath::GroupProcess { group, process } => self
                .group(group, path)?
                .process(process)
                .map(ModelObject::Process)
                .ok_or_else(missing),
        }
    }

    /// Field behind a path that denotes a field or a variable
    pub fn field_of(&self, path: &str) -> BenthosResult<FieldId> {
        match self.get_object(path)? {
            ModelObject::Field(field) => self
                .domain
                .field_id(field.name())
                .ok_or_else(|| BenthosError::not_found(path)),
            ModelObject::Variable(var) => var.field_id(),
            ModelObject::Channel(channel) => channel.intensity_id(),
            _ => Err(BenthosError::config(path, "path does not denote a field")),
        }
    }

    /// What an equation term at `path` reads
    pub fn term_target(&self, path: &str) -> BenthosResult<TermTarget> {
        match ObjectPath::parse(path)? {
            ObjectPath::Env(name) if matches!(self.env.get(name), Some(EnvEntity::Process(_))) => {
                Ok(TermTarget::Process(ProcessHandle {
                    scope: ScopeRef::Domain,
                    name: name.to_string(),
                }))
            }
            ObjectPath::GroupProcess { group, process } => {
                if self.group(group, path)?.process(process).is_none() {
                    return Err(BenthosError::not_found(path));
                }
                Ok(TermTarget::Process(ProcessHandle {
                    scope: ScopeRef::Group(group.to_string()),
                    name: process.to_string(),
                }))
            }
            _ => self.field_of(path).map(TermTarget::Field),
        }
    }

    /// Process behind a handle
    pub fn process(&self, handle: &ProcessHandle) -> BenthosResult<&'a Process> {
        let found = match &handle.scope {
            ScopeRef::Domain => match self.env.get(&handle.name) {
                Some(EnvEntity::Process(p)) => Some(p),
                _ => None,
            },
            ScopeRef::Group(group) => self.microbes.get(group).and_then(|g| g.process(&handle.name)),
        };
        found.ok_or_else(|| BenthosError::not_found(handle.name.clone()))
    }

    /// Evaluation scope of a process
    pub fn scope(&self, scope: &ScopeRef) -> BenthosResult<ScopeView<'a>> {
        match scope {
            ScopeRef::Domain => Ok(ScopeView::Domain(self.domain)),
            ScopeRef::Group(name) => {
                let path = format!("microbes.{}", name);
                Ok(ScopeView::Group(self.group(name, &path)?.scope(self.domain)))
            }
        }
    }
}
