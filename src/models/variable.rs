//! Model variables
//!
//! A [`ModelVariable`] is a named field of the domain. It is declared with a
//! creation value and unit, optional boundary constraints, an optional seed
//! profile, and optional clip bounds. Nothing touches the mesh until
//! [`setup`](Entity::setup), which runs:
//!
//! 1. create the field (values converted to base units)
//! 2. apply the seed profile
//! 3. record the values as old values, when the field keeps history
//! 4. pin the constraint locations
//!
//! # Seed profiles
//!
//! - `linear`: straight ramp from `start` to `stop`; an absent endpoint falls
//!   back to the `top` / `bottom` constraint
//! - `normal`: bell curve around `loc` with peak `coeff`
//! - `lognormal`: skewed profile starting at `loc` with peak `coeff`

use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entity::{DataNode, Entity, EntityCore, SetupContext, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::models::domain::{Location, SedimentDBLDomain};
use crate::physics::{CellField, FieldData, FieldId, ParamValue, Quantity, Unit};

// =================================================================================================
// Parameters
// =================================================================================================

fn default_value() -> ParamValue {
    ParamValue::Number(0.0)
}

fn default_store() -> bool {
    true
}

/// How the field is first created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateParams {
    /// Initial value; a value with its own unit overrides `unit`
    #[serde(default = "default_value")]
    pub value: ParamValue,
    /// Declared unit of the variable
    #[serde(default)]
    pub unit: Option<String>,
    /// Whether the field keeps the values of the previous step
    #[serde(default, rename = "hasOld")]
    pub has_old: bool,
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            value: default_value(),
            unit: None,
            has_old: false,
        }
    }
}

/// Shape of the initial profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedProfile {
    /// Ramp between two endpoints
    Linear,
    /// Normal distribution shape
    Normal,
    /// Log-normal distribution shape
    Lognormal,
}

/// Seed profile with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedParams {
    /// Profile kind
    pub profile: SeedProfile,
    /// `start`/`stop` for linear, `loc`/`scale`/`coeff` otherwise
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// Definition of a model variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableParams {
    /// Optional name, must match the entity name when given
    #[serde(default)]
    pub name: Option<String>,
    /// Creation value and unit
    #[serde(default)]
    pub create: CreateParams,
    /// Pinned values by location
    #[serde(default)]
    pub constraints: BTreeMap<Location, ParamValue>,
    /// Initial profile
    #[serde(default)]
    pub seed: Option<SeedParams>,
    /// Lower clip bound applied when a step is committed
    #[serde(default)]
    pub clip_min: Option<ParamValue>,
    /// Upper clip bound applied when a step is committed
    #[serde(default)]
    pub clip_max: Option<ParamValue>,
    /// Register the field by name on the domain
    #[serde(default)]
    pub store: Option<bool>,
}

// =================================================================================================
// Variable
// =================================================================================================

/// A named field of the model
#[derive(Debug, Clone)]
pub struct ModelVariable {
    core: EntityCore,
    params: VariableParams,
    unit: Unit,
    initial: Quantity,
    store: bool,
    field: Option<FieldId>,
}

impl ModelVariable {
    /// Validate a definition; the field is created in `setup`
    pub fn new(name: impl Into<String>, params: VariableParams) -> BenthosResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BenthosError::config("variable", "name must not be empty"));
        }
        if let Some(given) = &params.name
            && *given != name
        {
            return Err(BenthosError::config(
                format!("variable {}", name),
                format!("init_params name {:?} differs from the entity name", given),
            ));
        }

        let declared = match &params.create.unit {
            Some(text) => Unit::parse(text)?,
            None => Unit::dimensionless(),
        };
        let initial = params.create.value.to_quantity(&declared)?;
        let unit = if params.create.value.has_unit() {
            if params.create.unit.is_some() && !initial.unit.is_compatible(&declared) {
                return Err(BenthosError::unit_mismatch(
                    format!("variable {} create", name),
                    initial.unit.label(),
                    declared.label(),
                ));
            }
            initial.unit.clone()
        } else {
            declared
        };

        let constrained: Vec<Location> = params.constraints.keys().copied().collect();
        for (a, b) in [
            (Location::Top, Location::Dbl),
            (Location::Bottom, Location::Sediment),
        ] {
            if constrained.contains(&a) && constrained.contains(&b) {
                warn!(
                    "Variable {}: constraints {:?} and {:?} are redundant",
                    name,
                    a.as_str(),
                    b.as_str()
                );
            }
        }

        let store = params.store.unwrap_or_else(default_store);
        debug!("Created variable {} in {} (store={})", name, unit, store);
        Ok(Self {
            core: EntityCore::new(name),
            params,
            unit,
            initial,
            store,
            field: None,
        })
    }

    /// Same as [`new`](Self::new) but never registered on the domain by name
    pub fn unstored(name: impl Into<String>, mut params: VariableParams) -> BenthosResult<Self> {
        params.store = Some(false);
        Self::new(name, params)
    }

    /// Definition of the variable
    pub fn params(&self) -> &VariableParams {
        &self.params
    }

    /// Declared unit
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Whether the field is registered on the domain by name
    pub fn is_stored(&self) -> bool {
        self.store
    }

    /// Handle of the field
    pub fn field_id(&self) -> BenthosResult<FieldId> {
        self.field.ok_or_else(|| BenthosError::NotSetUp {
            name: self.name().to_string(),
        })
    }

    /// The field on `domain`
    pub fn field<'d>(&self, domain: &'d SedimentDBLDomain) -> BenthosResult<&'d CellField> {
        self.core.check_domain(domain)?;
        Ok(domain.field(self.field_id()?))
    }

    /// Base-unit value of a definition value, bare numbers in the declared unit
    fn in_field_units(&self, value: &ParamValue, context: &str) -> BenthosResult<f64> {
        let q = value.to_quantity(&self.unit)?;
        if !q.unit.is_compatible(&self.unit) {
            return Err(BenthosError::unit_mismatch(
                format!("variable {} {}", self.name(), context),
                q.unit.label(),
                self.unit.label(),
            ));
        }
        Ok(q.base_value())
    }

    fn length(&self, value: &ParamValue, context: &str) -> BenthosResult<f64> {
        value
            .to_quantity(&Unit::dimensionless())?
            .in_units_of(&Unit::meter())
            .map_err(|_| {
                BenthosError::unit_mismatch(
                    format!("variable {} {}", self.name(), context),
                    format!("{:?}", value),
                    "m",
                )
            })
    }

    // ============================================ seeds =============================================

    fn seed_values(&self, domain: &SedimentDBLDomain, seed: &SeedParams) -> BenthosResult<DVector<f64>> {
        let depths = domain.depths();
        match seed.profile {
            SeedProfile::Linear => {
                let endpoint = |key: &str, fallback: Location| -> BenthosResult<f64> {
                    let value = seed
                        .params
                        .get(key)
                        .or_else(|| self.params.constraints.get(&fallback))
                        .ok_or_else(|| {
                            BenthosError::missing_key(key, format!("linear seed of {}", self.name()))
                        })?;
                    self.in_field_units(value, "seed")
                };
                let start = endpoint("start", Location::Top)?;
                let stop = endpoint("stop", Location::Bottom)?;
                Ok(linspace(start, stop, domain.cells()))
            }
            SeedProfile::Normal | SeedProfile::Lognormal => {
                let get = |key: &str| {
                    seed.params.get(key).ok_or_else(|| {
                        BenthosError::missing_key(key, format!("seed of {}", self.name()))
                    })
                };
                let loc = self.length(get("loc")?, "seed loc")?;
                let scale = self.length(get("scale")?, "seed scale")?;
                let coeff = self.in_field_units(get("coeff")?, "seed coeff")?;
                if scale <= 0.0 {
                    return Err(BenthosError::config(
                        format!("variable {}", self.name()),
                        "seed scale should be positive",
                    ));
                }
                Ok(match seed.profile {
                    SeedProfile::Normal => normal_profile(depths, loc, scale, coeff),
                    _ => lognormal_profile(depths, loc, scale, coeff),
                })
            }
        }
    }

    fn apply_constraints(&self, domain: &mut SedimentDBLDomain, id: FieldId) -> BenthosResult<()> {
        for (location, value) in &self.params.constraints {
            let pinned = self.in_field_units(value, "constraint")?;
            let cells = domain.location(*location);
            info!(
                "Constraining {} at {:?} to {} {}",
                self.name(),
                location.as_str(),
                pinned,
                self.unit.base()
            );
            domain.field_mut(id).constrain(pinned, cells)?;
        }
        Ok(())
    }

    /// Commit an accepted step: clip, then store the old values
    pub fn update_var(&self, domain: &mut SedimentDBLDomain) -> BenthosResult<()> {
        let id = self.field_id()?;
        let lo = self
            .params
            .clip_min
            .as_ref()
            .map(|v| self.in_field_units(v, "clip_min"))
            .transpose()?;
        let hi = self
            .params
            .clip_max
            .as_ref()
            .map(|v| self.in_field_units(v, "clip_max"))
            .transpose()?;
        let field = domain.field_mut(id);
        if lo.is_some() || hi.is_some() {
            field.clip(lo, hi);
        }
        field.update_old();
        Ok(())
    }

    /// Undo the tentative values of a rejected step
    pub fn revert_var(&self, domain: &mut SedimentDBLDomain) -> BenthosResult<()> {
        let id = self.field_id()?;
        domain.field_mut(id).revert();
        Ok(())
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> DVector<f64> {
    if n < 2 {
        return DVector::from_element(n, start);
    }
    let step = (stop - start) / (n - 1) as f64;
    DVector::from_fn(n, |i, _| start + step * i as f64)
}

fn normal_pdf(x: f64, loc: f64, scale: f64) -> f64 {
    let z = (x - loc) / scale;
    (-0.5 * z * z).exp() / (scale * (2.0 * PI).sqrt())
}

/// `coeff · pdf(z; loc, C²·scale) · C · scale` with `C = 1/√(2π)`
fn normal_profile(depths: &DVector<f64>, loc: f64, scale: f64, coeff: f64) -> DVector<f64> {
    let c = 1.0 / (2.0 * PI).sqrt();
    let width = c * c * scale;
    depths.map(|z| coeff * normal_pdf(z, loc, width) * c * scale)
}

const LOGNORMAL_SHAPE: f64 = 1.25;

fn lognormal_pdf(x: f64, loc: f64, scale: f64, shape: f64) -> f64 {
    let y = (x - loc) / scale;
    if y <= 0.0 {
        return 0.0;
    }
    let l = y.ln() / shape;
    (-0.5 * l * l).exp() / (shape * y * (2.0 * PI).sqrt()) / scale
}

/// Log-normal shape `1.25`, scaled by `2π·scale / 1.25`, with peak `coeff`
fn lognormal_profile(depths: &DVector<f64>, loc: f64, scale: f64, coeff: f64) -> DVector<f64> {
    let width = 2.0 * PI * scale / LOGNORMAL_SHAPE;
    let mode = loc + width * (-LOGNORMAL_SHAPE * LOGNORMAL_SHAPE).exp();
    let peak = lognormal_pdf(mode, loc, width, LOGNORMAL_SHAPE);
    depths.map(|z| coeff * lognormal_pdf(z, loc, width, LOGNORMAL_SHAPE) / peak)
}

impl Entity for ModelVariable {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        if self.is_setup() {
            debug!("Variable {} already set up", self.name());
            return Ok(());
        }
        self.core.check_domain(ctx.domain)?;

        let base = self.unit.base();
        let value = self.initial.base_value();
        info!("Creating {} with value {} {}", self.name(), value, base);
        let id = ctx.domain.create_field(
            self.name(),
            base,
            FieldData::Scalar(value),
            self.params.create.has_old,
            self.store,
        )?;

        if let Some(seed) = &self.params.seed {
            let values = self.seed_values(ctx.domain, seed)?;
            debug!("Seeding {} with {:?} profile", self.name(), seed.profile);
            ctx.domain.field_mut(id).set_values(values)?;
        }
        ctx.domain.field_mut(id).update_old();
        self.apply_constraints(ctx.domain, id)?;

        self.field = Some(id);
        self.core.mark_setup()
    }

    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode> {
        let field = self.field(domain)?;
        let base = self.unit.base();
        let mut state = StateNode::with_data(DataNode::cells(field.values(), base.label()));
        for (location, value) in &self.params.constraints {
            let pinned = Quantity::new(self.in_field_units(value, "constraint")?, base.clone());
            state = state.meta(format!("constraint_{}", location.as_str()), pinned.to_string());
        }
        Ok(state)
    }

    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        self.core.check_domain(domain)?;
        let id = self.field_id()?;
        let data = state.require_data(self.name())?;
        if data.unit != self.unit.base().label() {
            return Err(BenthosError::unit_mismatch(
                format!("restore of {}", self.name()),
                data.unit.clone(),
                self.unit.base().label(),
            ));
        }
        let values = data.to_vector(tidx, domain.cells())?;
        let field = domain.field_mut(id);
        field.set_values(values)?;
        field.update_old();
        debug!("Restored {} at time index {:?}", self.name(), tidx);
        Ok(())
    }
}

// =================================================================================================
// Tests
// =================================================================================================
