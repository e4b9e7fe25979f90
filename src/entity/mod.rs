//! Entity graph
//!
//! Anything that lives on the model domain (variables, processes,
//! irradiance, microbial groups) is an [`Entity`]. Entities go through an
//! explicit three-state [`Lifecycle`]:
//!
//! ```text
//! Constructed ──set_domain──▶ Attached(id) ──setup──▶ SetUp(id)
//! ```
//!
//! Construction only validates configuration; fields are created on the
//! mesh in `setup`. The model owns the domain and all entities: an entity
//! stores only the [`DomainId`] token of the domain it was attached to and
//! receives the domain by reference at call time.
//!
//! Entities are created from declarative definitions through the
//! [`Registry`], and serialise their state into [`StateNode`] trees.

pub mod registry;
pub mod snapshot;

pub use registry::{EntityDef, EntityKind, FactoryContext, Registry};
pub use snapshot::{DataNode, MetaValue, StateNode};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{BenthosError, BenthosResult};
use crate::models::SedimentDBLDomain;
use crate::physics::FieldId;
use crate::solver::ModelClock;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identifier for domains and evaluation scopes
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity token of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u64);

impl DomainId {
    pub(crate) fn fresh() -> Self {
        Self(next_id())
    }

    /// Raw identifier
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Lifecycle state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Configuration only
    Constructed,
    /// Bound to a domain, fields not created yet
    Attached(DomainId),
    /// Fields exist on the domain
    SetUp(DomainId),
}

/// Name and lifecycle shared by every entity
#[derive(Debug, Clone)]
pub struct EntityCore {
    name: String,
    lifecycle: Lifecycle,
}

impl EntityCore {
    /// New core in the `Constructed` state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Constructed,
        }
    }

    /// Entity name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Bind to a domain; fails if already bound
    pub fn attach(&mut self, id: DomainId) -> BenthosResult<()> {
        match self.lifecycle {
            Lifecycle::Constructed => {
                self.lifecycle = Lifecycle::Attached(id);
                Ok(())
            }
            _ => Err(BenthosError::AlreadyAttached {
                name: self.name.clone(),
            }),
        }
    }

    /// Whether a domain is bound
    pub fn has_domain(&self) -> bool {
        !matches!(self.lifecycle, Lifecycle::Constructed)
    }

    /// The bound domain
    pub fn domain_id(&self) -> BenthosResult<DomainId> {
        match self.lifecycle {
            Lifecycle::Attached(id) | Lifecycle::SetUp(id) => Ok(id),
            Lifecycle::Constructed => Err(BenthosError::NotAttached {
                name: self.name.clone(),
            }),
        }
    }

    /// Check that `domain` is the bound domain
    pub fn check_domain(&self, domain: &SedimentDBLDomain) -> BenthosResult<()> {
        if self.domain_id()? != domain.id() {
            return Err(BenthosError::DomainMismatch {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Whether `setup` has completed
    pub fn is_setup(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::SetUp(_))
    }

    /// Move to `SetUp`; requires a bound domain
    pub fn mark_setup(&mut self) -> BenthosResult<()> {
        let id = self.domain_id()?;
        self.lifecycle = Lifecycle::SetUp(id);
        Ok(())
    }

    /// Fail unless set up
    pub fn require_setup(&self) -> BenthosResult<()> {
        if self.is_setup() {
            Ok(())
        } else {
            Err(BenthosError::NotSetUp {
                name: self.name.clone(),
            })
        }
    }
}

/// What an entity can reach during `setup`
pub struct SetupContext<'a> {
    /// The model domain
    pub domain: &'a mut SedimentDBLDomain,
    /// Fields created so far, by model path (`env.oxy`, `microbes.cyano.features.biomass`)
    pub fields: &'a BTreeMap<String, FieldId>,
}

impl<'a> SetupContext<'a> {
    /// Bundle the domain with the known field paths
    pub fn new(domain: &'a mut SedimentDBLDomain, fields: &'a BTreeMap<String, FieldId>) -> Self {
        Self { domain, fields }
    }

    /// Resolve a field by model path, falling back to a domain field name
    pub fn field(&self, path: &str) -> BenthosResult<FieldId> {
        if let Some(id) = self.fields.get(path) {
            return Ok(*id);
        }
        let name = path.strip_prefix("domain.").unwrap_or(path);
        self.domain
            .field_id(name)
            .ok_or_else(|| BenthosError::not_found(path))
    }
}

/// A participant of the model bound to the domain
pub trait Entity {
    /// Shared name and lifecycle
    fn core(&self) -> &EntityCore;

    /// Mutable access to the shared state
    fn core_mut(&mut self) -> &mut EntityCore;

    /// Entity name
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Bind to `domain` exactly once, then run [`on_domain_set`](Entity::on_domain_set)
    fn set_domain(&mut self, domain: &SedimentDBLDomain) -> BenthosResult<()> {
        self.core_mut().attach(domain.id())?;
        debug!("{} attached to domain {:?}", self.name(), domain.id());
        self.on_domain_set(domain)
    }

    /// Hook fired after attachment, e.g. to attach sub-entities
    fn on_domain_set(&mut self, _domain: &SedimentDBLDomain) -> BenthosResult<()> {
        Ok(())
    }

    /// Whether setup has completed
    fn is_setup(&self) -> bool {
        self.core().is_setup()
    }

    /// Create fields on the domain; repeated calls are no-ops
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()>;

    /// React to a new clock value
    fn on_time_updated(
        &mut self,
        _domain: &mut SedimentDBLDomain,
        _clock: &ModelClock,
    ) -> BenthosResult<()> {
        Ok(())
    }

    /// Serialise the state
    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode>;

    /// Restore from a snapshot, at time index `tidx` of a stored series
    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut core = EntityCore::new("oxy");
        assert_eq!(core.lifecycle(), Lifecycle::Constructed);
        assert!(matches!(core.domain_id(), Err(BenthosError::NotAttached { .. })));
        assert!(core.mark_setup().is_err());

        let id = DomainId::fresh();
        core.attach(id).unwrap();
        assert_eq!(core.lifecycle(), Lifecycle::Attached(id));
        assert!(matches!(core.require_setup(), Err(BenthosError::NotSetUp { .. })));

        core.mark_setup().unwrap();
        assert!(core.is_setup());
        assert_eq!(core.domain_id().unwrap(), id);
    }

    #[test]
    fn test_second_attach_fails() {
        let mut core = EntityCore::new("oxy");
        core.attach(DomainId::fresh()).unwrap();
        let err = core.attach(DomainId::fresh()).unwrap_err();
        assert!(matches!(err, BenthosError::AlreadyAttached { name } if name == "oxy"));
        core.mark_setup().unwrap();
        assert!(core.attach(DomainId::fresh()).is_err());
    }

    fn attach_twice(entity: &mut dyn Entity, domain: &SedimentDBLDomain) {
        entity.set_domain(domain).unwrap();
        let err = entity.set_domain(domain).unwrap_err();
        assert!(
            matches!(&err, BenthosError::AlreadyAttached { name } if name == entity.name()),
            "{:?}",
            err
        );
        assert_eq!(entity.core().lifecycle(), Lifecycle::Attached(domain.id()));
    }

    #[test]
    fn test_second_attach_fails_for_every_entity_kind() {
        use crate::expression::Namespace;
        use crate::models::{
            DomainParams, Irradiance, IrradianceParams, ModelVariable, Process, ProcessParams, VariableParams,
        };

        let domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();

        let params: VariableParams = serde_yaml::from_str("create: {value: 0.1, hasOld: true}\n").unwrap();
        attach_twice(&mut ModelVariable::new("oxy", params).unwrap(), &domain);

        let params: ProcessParams =
            serde_yaml::from_str("expr: a\nresponses:\n  sat:\n    expr: b / (b + 1)\n").unwrap();
        let mut process = Process::new("p", &params, &Namespace::new()).unwrap();
        attach_twice(&mut process, &domain);
        let other = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        assert!(matches!(
            process.set_domain(&other),
            Err(BenthosError::AlreadyAttached { .. })
        ));
        // responses follow their parent and stay on the first domain
        let sat = &process.responses()["sat"];
        assert_eq!(sat.core().lifecycle(), Lifecycle::Attached(domain.id()));

        let params: IrradianceParams =
            serde_yaml::from_str("hours_total: 24\nchannels:\n  - name: par\n    k0: 15\n").unwrap();
        let mut irradiance = Irradiance::new("irradiance", &params).unwrap();
        attach_twice(&mut irradiance, &domain);
        let par = &irradiance.channels()["par"];
        assert_eq!(par.core().lifecycle(), Lifecycle::Attached(domain.id()));
        assert!(matches!(
            irradiance.set_domain(&other),
            Err(BenthosError::AlreadyAttached { .. })
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = DomainId::fresh();
        let b = DomainId::fresh();
        assert_ne!(a, b);
    }
}
