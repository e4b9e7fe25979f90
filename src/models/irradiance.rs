//! Irradiance through the sediment column
//!
//! The surface level follows a diel cycle: a raised-cosine pulse centred on
//! the zenith time, zero outside the illuminated part of the day and
//! `zenith_level` at the zenith. Each [`IrradianceChannel`] attenuates the
//! surface level with depth:
//!
//! ```text
//! k(z)         = k0·sed_mask(z) + Σ coeff_i · var_i(z)
//! intensity(z) = surface · Π_{j ≤ z} exp(−k_j · d_j)
//! ```
//!
//! where `d` are the distances between neighbouring cell centres. The
//! intensity field is registered on the domain under the channel name.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{DataNode, Entity, EntityCore, SetupContext, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::models::domain::SedimentDBLDomain;
use crate::physics::{FieldData, FieldId, ParamValue, Quantity, Unit};
use crate::solver::ModelClock;

// =================================================================================================
// Parameters
// =================================================================================================

fn default_hours_total() -> ParamValue {
    ParamValue::Number(24.0)
}

fn default_day_fraction() -> f64 {
    0.5
}

fn default_k0() -> ParamValue {
    ParamValue::Number(0.0)
}

/// Definition of an attenuation channel; plain `k0` values are in 1/cm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelParams {
    /// Channel name, also the name of its intensity field
    pub name: String,
    /// Base attenuation in the sediment
    #[serde(default = "default_k0")]
    pub k0: ParamValue,
    /// Extra attenuation as `(variable path, coefficient)` pairs
    #[serde(default)]
    pub k_mods: Vec<(String, ParamValue)>,
}

/// Definition of the irradiance; plain `hours_total` values are hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IrradianceParams {
    /// Length of the diel period, between 2 and 48 hours
    #[serde(default = "default_hours_total")]
    pub hours_total: ParamValue,
    /// Illuminated fraction of the period
    #[serde(default = "default_day_fraction")]
    pub day_fraction: f64,
    /// Attenuation channels
    #[serde(default)]
    pub channels: Vec<ChannelParams>,
}

impl Default for IrradianceParams {
    fn default() -> Self {
        Self {
            hours_total: default_hours_total(),
            day_fraction: default_day_fraction(),
            channels: Vec::new(),
        }
    }
}

// =================================================================================================
// Channel
// =================================================================================================

/// One attenuated band of the irradiance
#[derive(Debug)]
pub struct IrradianceChannel {
    core: EntityCore,
    k0: f64,
    k_mods: Vec<(String, Quantity)>,
    sources: Vec<(FieldId, f64)>,
    k_field: Option<FieldId>,
    intensity: Option<FieldId>,
}

impl IrradianceChannel {
    /// Validate a channel definition
    pub fn new(params: &ChannelParams) -> BenthosResult<Self> {
        if params.name.is_empty() {
            return Err(BenthosError::config("irradiance", "channel name must not be empty"));
        }
        let per_cm = Unit::parse("1/cm")?;
        let k0 = params
            .k0
            .to_quantity(&per_cm)?
            .in_units_of(&Unit::meter().powi(-1))?;
        let mut k_mods = Vec::with_capacity(params.k_mods.len());
        for (path, coeff) in &params.k_mods {
            if k_mods.iter().any(|(p, _)| p == path) {
                return Err(BenthosError::duplicate(path.clone(), format!("channel {}", params.name)));
            }
            k_mods.push((path.clone(), coeff.to_quantity(&Unit::dimensionless())?));
        }
        Ok(Self {
            core: EntityCore::new(params.name.clone()),
            k0,
            k_mods,
            sources: Vec::new(),
            k_field: None,
            intensity: None,
        })
    }

    /// Base attenuation in 1/m
    pub fn k0(&self) -> f64 {
        self.k0
    }

    /// Intensity field
    pub fn intensity_id(&self) -> BenthosResult<FieldId> {
        self.intensity.ok_or_else(|| BenthosError::NotSetUp {
            name: self.name().to_string(),
        })
    }

    fn attenuation(&self, domain: &SedimentDBLDomain) -> BenthosResult<DVector<f64>> {
        let k_id = self.k_field.ok_or_else(|| BenthosError::NotSetUp {
            name: self.name().to_string(),
        })?;
        let mut k = domain.field(k_id).values().clone();
        for (id, coeff) in &self.sources {
            k += domain.field(*id).values() * *coeff;
        }
        Ok(k)
    }

    /// Cumulative attenuation factor per cell
    pub fn attenuation_profile(&self, domain: &SedimentDBLDomain) -> BenthosResult<DVector<f64>> {
        let k = self.attenuation(domain)?;
        let distances = domain.distances();
        let mut acc = 1.0;
        Ok(DVector::from_fn(k.len(), |i, _| {
            acc *= (-k[i] * distances[i]).exp();
            acc
        }))
    }

    /// Recompute the intensities for a surface level
    pub fn update_intensities(&self, domain: &mut SedimentDBLDomain, surface: f64) -> BenthosResult<()> {
        let profile = self.attenuation_profile(domain)? * surface;
        let id = self.intensity_id()?;
        domain.field_mut(id).set_values(profile)
    }
}

impl Entity for IrradianceChannel {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        if self.is_setup() {
            return Ok(());
        }
        self.core.check_domain(ctx.domain)?;
        let per_m = Unit::meter().powi(-1);
        let surface = ctx.domain.idx_surface();
        let k0 = DVector::from_fn(ctx.domain.cells(), |i, _| if i < surface { 0.0 } else { self.k0 });
        let k_name = format!("{}_k", self.name());
        self.k_field = Some(ctx.domain.create_field(&k_name, per_m.clone(), k0.into(), false, false)?);
        self.intensity = Some(ctx.domain.create_field(
            self.name(),
            Unit::dimensionless(),
            FieldData::Scalar(0.0),
            false,
            true,
        )?);

        for (path, coeff) in &self.k_mods {
            let id = ctx.field(path)?;
            let source_unit = ctx.domain.field(id).unit();
            if !(source_unit * &coeff.unit).is_compatible(&per_m) {
                return Err(BenthosError::unit_mismatch(
                    format!("attenuation source {} of {}", path, self.name()),
                    format!("{} * {}", source_unit, coeff.unit),
                    "1/m",
                ));
            }
            info!("Added attenuation source {:?} and coeff={} to {}", path, coeff, self.name());
            self.sources.push((id, coeff.base_value()));
        }
        self.core.mark_setup()
    }

    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode> {
        self.core.check_domain(domain)?;
        let per_m = Unit::meter().powi(-1);
        let mut attenuation =
            StateNode::with_data(DataNode::cells(&self.attenuation(domain)?, per_m.label()));
        for (path, coeff) in &self.k_mods {
            attenuation = attenuation.meta(path.clone(), coeff.to_string());
        }
        let intensity = domain.field(self.intensity_id()?);
        let mut state = StateNode::new().meta("k0", Quantity::new(self.k0, per_m).to_string());
        state.insert_child("attenuation", attenuation);
        state.insert_child(
            "intensity",
            StateNode::with_data(DataNode::cells(intensity.values(), intensity.unit().label())),
        );
        Ok(state)
    }

    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        self.core.check_domain(domain)?;
        if let Some(node) = state.child("intensity") {
            let values = node.require_data(self.name())?.to_vector(tidx, domain.cells())?;
            let id = self.intensity_id()?;
            domain.field_mut(id).set_values(values)?;
        }
        Ok(())
    }
}

// =================================================================================================
// Irradiance
// =================================================================================================

/// Diel surface irradiance with attenuation channels
#[derive(Debug)]
pub struct Irradiance {
    core: EntityCore,
    hours_total: f64,
    day_fraction: f64,
    hours_day: f64,
    zenith_time: f64,
    zenith_level: f64,
    surface: f64,
    channels: BTreeMap<String, IrradianceChannel>,
}

impl Irradiance {
    /// Validate a definition
    pub fn new(name: impl Into<String>, params: &IrradianceParams) -> BenthosResult<Self> {
        let hours_total = params
            .hours_total
            .to_quantity(&Unit::parse("h")?)?
            .in_units_of(&Unit::parse("h")?)?;
        BenthosError::check_range("hours_total", hours_total, 2.0, 48.0)?;
        let day_fraction = params.day_fraction;
        if !(day_fraction > 0.0 && day_fraction < 1.0) {
            return Err(BenthosError::OutOfRange {
                field: "day_fraction",
                value: day_fraction,
                min: 0.0,
                max: 1.0,
            });
        }
        let hours_day = day_fraction * hours_total;

        let mut channels = BTreeMap::new();
        for def in &params.channels {
            if channels.contains_key(&def.name) {
                return Err(BenthosError::duplicate(def.name.clone(), "irradiance channels"));
            }
            channels.insert(def.name.clone(), IrradianceChannel::new(def)?);
        }

        let name = name.into();
        debug!(
            "Created irradiance {} (total={} h, day={} h, channels={:?})",
            name,
            hours_total,
            hours_day,
            channels.keys().collect::<Vec<_>>()
        );
        Ok(Self {
            core: EntityCore::new(name),
            hours_total,
            day_fraction,
            hours_day,
            zenith_time: hours_day,
            zenith_level: 100.0,
            surface: 0.0,
            channels,
        })
    }

    /// Length of the diel period in hours
    pub fn hours_total(&self) -> f64 {
        self.hours_total
    }

    /// Length of the diel period in seconds
    pub fn period_seconds(&self) -> f64 {
        self.hours_total * 3600.0
    }

    /// Current surface level
    pub fn surface(&self) -> f64 {
        self.surface
    }

    /// Channels by name
    pub fn channels(&self) -> &BTreeMap<String, IrradianceChannel> {
        &self.channels
    }

    /// Channel by name
    pub fn channel(&self, name: &str) -> Option<&IrradianceChannel> {
        self.channels.get(name)
    }

    /// Surface level at `seconds` of clock time
    pub fn surface_level(&self, seconds: f64) -> f64 {
        let t = (seconds / 3600.0).rem_euclid(self.hours_total);
        self.zenith_level * self.hours_day / 2.0 * self.cosine_pdf(t)
    }

    fn cosine_pdf(&self, t: f64) -> f64 {
        let scale = self.hours_day / (2.0 * PI);
        let x = (t - self.zenith_time) / scale;
        if x.abs() > PI {
            0.0
        } else {
            (1.0 + x.cos()) / (2.0 * PI * scale)
        }
    }

    fn update(&mut self, domain: &mut SedimentDBLDomain, seconds: f64) -> BenthosResult<()> {
        self.surface = self.surface_level(seconds);
        debug!("Updated for time {} s surface irradiance: {}", seconds, self.surface);
        for channel in self.channels.values() {
            channel.update_intensities(domain, self.surface)?;
        }
        Ok(())
    }
}

impl Entity for Irradiance {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn on_domain_set(&mut self, domain: &SedimentDBLDomain) -> BenthosResult<()> {
        for channel in self.channels.values_mut() {
            channel.set_domain(domain)?;
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        if self.is_setup() {
            return Ok(());
        }
        self.core.check_domain(ctx.domain)?;
        for channel in self.channels.values_mut() {
            channel.setup(ctx)?;
        }
        self.update(ctx.domain, 0.0)?;
        self.core.mark_setup()
    }

    fn on_time_updated(&mut self, domain: &mut SedimentDBLDomain, clock: &ModelClock) -> BenthosResult<()> {
        self.update(domain, clock.seconds())
    }

    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode> {
        self.core.check_domain(domain)?;
        let mut channels = StateNode::new();
        for (name, channel) in &self.channels {
            channels.insert_child(name.clone(), channel.snapshot(domain)?);
        }
        let mut state = StateNode::new()
            .meta("hours_total", format!("{} h", self.hours_total))
            .meta("day_fraction", self.day_fraction)
            .meta("zenith_time", format!("{} h", self.zenith_time))
            .meta("zenith_level", self.zenith_level);
        state.insert_child("channels", channels);
        Ok(state)
    }

    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        self.core.check_domain(domain)?;
        let Some(channels) = state.child("channels") else {
            return Ok(());
        };
        for (name, channel) in self.channels.iter_mut() {
            if let Some(node) = channels.child(name) {
                channel.restore_from(domain, node, tidx)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::DomainParams;
    use approx::assert_relative_eq;

    fn irradiance(yaml: &str) -> Irradiance {
        let params: IrradianceParams = serde_yaml::from_str(yaml).unwrap();
        Irradiance::new("irrad", &params).unwrap()
    }

    #[test]
    fn test_diel_surface_cycle() {
        let irr = irradiance("hours_total: 24\nday_fraction: 0.5\n");
        assert_relative_eq!(irr.surface_level(0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(irr.surface_level(24.0 * 3600.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(irr.surface_level(12.0 * 3600.0), 100.0, epsilon = 1e-9);
        assert!(irr.surface_level(9.0 * 3600.0) > 0.0);
        assert!(irr.surface_level(9.0 * 3600.0) < 100.0);
    }

    #[test]
    fn test_parameter_ranges() {
        let bad = [
            "hours_total: 1\n",
            "hours_total: 50\n",
            "day_fraction: 0\n",
            "day_fraction: 1.0\n",
        ];
        for yaml in bad {
            let params: IrradianceParams = serde_yaml::from_str(yaml).unwrap();
            assert!(Irradiance::new("irrad", &params).is_err(), "{}", yaml);
        }
        let tagged = irradiance("hours_total: 720 min\n");
        assert_relative_eq!(tagged.hours_total(), 12.0);
    }

    #[test]
    fn test_channel_attenuation() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        let mut irr = irradiance("channels:\n  - name: par\n    k0: 15\n");
        irr.set_domain(&domain).unwrap();
        let fields = BTreeMap::new();
        irr.setup(&mut SetupContext::new(&mut domain, &fields)).unwrap();

        let mut clock = ModelClock::new();
        clock.increment_time(12.0 * 3600.0).unwrap();
        irr.on_time_updated(&mut domain, &clock).unwrap();

        let par = domain.get("par").unwrap().values();
        // no attenuation in the DBL
        assert_relative_eq!(par[0], 100.0, epsilon = 1e-9);
        assert_relative_eq!(par[9], 100.0, epsilon = 1e-9);
        let k: f64 = 1500.0;
        assert_relative_eq!(par[10], 100.0 * (-k * 1e-4).exp(), epsilon = 1e-9);
        assert!(par[109] < par[50]);
    }

    #[test]
    fn test_k_mod_units_checked() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        domain
            .create_field("biomass", Unit::parse("kg/m**3").unwrap(), 1.0.into(), false, true)
            .unwrap();
        let mut irr = irradiance(
            "channels:\n  - name: par\n    k_mods: [[biomass, 1 m**3/kg]]\n",
        );
        irr.set_domain(&domain).unwrap();
        let fields = BTreeMap::new();
        let err = irr.setup(&mut SetupContext::new(&mut domain, &fields)).unwrap_err();
        assert!(matches!(err, BenthosError::UnitMismatch { .. }));
    }

    #[test]
    fn test_k_mod_adds_attenuation() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        domain
            .create_field("biomass", Unit::parse("kg/m**3").unwrap(), 1.0.into(), false, true)
            .unwrap();
        let mut irr = irradiance(
            "channels:\n  - name: par\n    k_mods: [[biomass, 100 m**2/kg]]\n",
        );
        irr.set_domain(&domain).unwrap();
        let fields = BTreeMap::new();
        irr.setup(&mut SetupContext::new(&mut domain, &fields)).unwrap();
        let profile = irr.channel("par").unwrap().attenuation_profile(&domain).unwrap();
        assert_relative_eq!(profile[0], (-100.0 * 5e-5f64).exp(), epsilon = 1e-12);
    }
}
